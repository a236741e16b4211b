//! 标签体体积与灰度统计.

use itertools::{Itertools, MinMaxResult};
use ndarray::Zip;

use crate::consts::MM3_PER_CC;
use crate::data::{LabelVolume, ScanVolume};
use crate::metrics::LabelRange;

/// 标签体的体积统计, 以及 (可选的) 标签区域内扫描体的灰度统计.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct LabelStatistics {
    /// 前景体素个数.
    pub count: usize,
    /// 体积, 立方毫米.
    pub volume_mm3: f64,
    /// 体积, 立方厘米.
    pub volume_cc: f64,
    /// 标签区域内的平均灰度.
    pub mean_intensity: Option<f64>,
    /// 标签区域内的最小灰度.
    pub min_intensity: Option<f32>,
    /// 标签区域内的最大灰度.
    pub max_intensity: Option<f32>,
}

impl LabelStatistics {
    /// 统计 `label` 中落在 `range` 内的体素.
    ///
    /// 仅当 `scan` 与 `label` 的数据形状一致时才计算灰度统计.
    pub fn compute(label: &LabelVolume, scan: Option<&ScanVolume>, range: LabelRange) -> Self {
        let count = label.data().iter().filter(|p| range.contains(**p)).count();
        let volume_mm3 = count as f64 * label.grid().voxel_volume();

        let mut ans = Self {
            count,
            volume_mm3,
            volume_cc: volume_mm3 / MM3_PER_CC,
            mean_intensity: None,
            min_intensity: None,
            max_intensity: None,
        };

        let Some(scan) = scan else {
            return ans;
        };
        if scan.shape() != label.shape() {
            log::warn!(
                "scan shape {:?} differs from label shape {:?}, intensity skipped",
                scan.shape(),
                label.shape()
            );
            return ans;
        }

        let mut inside = Vec::with_capacity(count);
        Zip::from(label.data())
            .and(scan.data())
            .for_each(|&p, &v| {
                if range.contains(p) {
                    inside.push(v);
                }
            });
        if !inside.is_empty() {
            ans.mean_intensity =
                Some(inside.iter().map(|v| f64::from(*v)).sum::<f64>() / inside.len() as f64);
        }
        let minmax = inside.iter().copied().minmax_by(f32::total_cmp);
        (ans.min_intensity, ans.max_intensity) = match minmax {
            MinMaxResult::NoElements => (None, None),
            MinMaxResult::OneElement(v) => (Some(v), Some(v)),
            MinMaxResult::MinMax(lo, hi) => (Some(lo), Some(hi)),
        };
        ans
    }
}
