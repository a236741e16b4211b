//! Dice 重叠系数.
//!
//! 待比较的标签体先以最近邻插值重采样到参考标签体的网格上, 再用同一个闭区间阈值
//! 将两者二值化, 最后计算 `2|A ∩ B| / (|A| + |B|)`. 两个掩膜都为空时约定 Dice 为 0.

use ndarray::{Array3, Zip};

use crate::consts::gray::{BACKGROUND, FOREGROUND_LOWER, FOREGROUND_UPPER};
use crate::data::{Grid, LabelVolume};
use crate::error::MetricError;

/// 二值化使用的闭区间 `[lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelRange {
    lower: u8,
    upper: u8,
}

impl Default for LabelRange {
    fn default() -> Self {
        Self {
            lower: FOREGROUND_LOWER,
            upper: FOREGROUND_UPPER,
        }
    }
}

impl LabelRange {
    /// 创建区间. 当 `lower > upper` 时返回 `None`.
    pub fn new(lower: u8, upper: u8) -> Option<Self> {
        (lower <= upper).then_some(Self { lower, upper })
    }

    /// 下限 (含).
    #[inline]
    pub fn lower(&self) -> u8 {
        self.lower
    }

    /// 上限 (含).
    #[inline]
    pub fn upper(&self) -> u8 {
        self.upper
    }

    /// 体素值是否落在区间内?
    #[inline]
    pub fn contains(&self, p: u8) -> bool {
        (self.lower..=self.upper).contains(&p)
    }
}

/// 将标签体重采样到另一个网格上.
pub trait Resampler {
    /// 返回定义在 `target` 网格上的新标签体.
    fn resample(&self, moving: &LabelVolume, target: &Grid) -> Result<LabelVolume, MetricError>;
}

/// 最近邻插值. 落在 `moving` 网格外的体素取背景值.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighbor;

impl Resampler for NearestNeighbor {
    fn resample(&self, moving: &LabelVolume, target: &Grid) -> Result<LabelVolume, MetricError> {
        if !target.has_valid_spacing() {
            return Err(MetricError::DegenerateGrid("reference"));
        }
        let to_index = moving
            .grid()
            .physical_to_index()
            .ok_or(MetricError::DegenerateGrid("moving"))?;
        let (mz, mh, mw) = moving.shape();

        let data = Array3::from_shape_fn(target.shape(), |(z, h, w)| {
            let p = target.index_to_physical(&[w as f64, h as f64, z as f64]);
            let [i, j, k] = to_index.eval(&p).map(f64::round);
            let inside = |v: f64, len: usize| v >= 0.0 && v < len as f64;
            if inside(i, mw) && inside(j, mh) && inside(k, mz) {
                moving[(k as usize, j as usize, i as usize)]
            } else {
                BACKGROUND
            }
        });
        LabelVolume::new(target.clone(), data)
    }
}

/// 计算 `reference` 与 `moving` 的 Dice 系数.
///
/// 两者网格完全一致时不做重采样.
pub fn dice<R: Resampler + ?Sized>(
    reference: &LabelVolume,
    moving: &LabelVolume,
    resampler: &R,
    range: LabelRange,
) -> Result<f64, MetricError> {
    let resampled;
    let moving = if reference.grid() == moving.grid() {
        moving
    } else {
        resampled = resampler.resample(moving, reference.grid())?;
        &resampled
    };

    let (mut a, mut b, mut both) = (0usize, 0usize, 0usize);
    Zip::from(reference.data())
        .and(moving.data())
        .for_each(|&p, &q| {
            let (x, y) = (range.contains(p), range.contains(q));
            a += x as usize;
            b += y as usize;
            both += (x && y) as usize;
        });

    if a + b == 0 {
        log::debug!("dice requested on two empty masks");
        return Ok(0.0);
    }
    Ok(2.0 * both as f64 / (a + b) as f64)
}
