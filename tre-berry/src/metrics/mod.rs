//! 误差与重叠度指标.
//!
//! 1. TRE/LRE: 对应点的欧氏距离. 病例误差为已配对点的算术平均,
//!   队列误差为各病例平均值的算术平均 (而非所有点的合并平均).
//! 2. Dice: 见 [`dice`].
//! 3. 标签体体积统计: 见 [`volume`].
//! 4. 靶向敏感度: 同一配准类型下, 人工与自动流程变换后目标点按位置逐一比较.

use ordered_float::OrderedFloat;

use crate::data::{Fiducial, LandmarkSet};
use crate::error::{EmptyCohortError, MetricError};
use crate::linalg;
use crate::matching::{Correspondence, IndexedFiducial};

pub mod dice;
pub mod volume;

pub use dice::{dice, LabelRange, NearestNeighbor, Resampler};
pub use volume::LabelStatistics;

/// 单个对应点的误差.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct LandmarkError {
    /// 被搜索点集 (术中) 中的点.
    pub source: IndexedFiducial,
    /// 参考点集 (变换后的术前) 中的点.
    pub target: IndexedFiducial,
    /// 欧氏距离, 毫米.
    pub distance: f64,
}

/// 单个病例的配准精度.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct CaseAccuracy {
    /// 每个已配对点的误差, 按参考点集顺序.
    pub landmarks: Vec<LandmarkError>,
    /// 已配对点误差的算术平均. 没有任何已配对点时为 `None`.
    pub mean: Option<f64>,
    /// 未配对的参考点个数.
    pub unmatched: usize,
}

impl CaseAccuracy {
    /// 最大误差.
    pub fn max(&self) -> Option<f64> {
        self.landmarks
            .iter()
            .map(|e| OrderedFloat(e.distance))
            .max()
            .map(|d| d.0)
    }
}

/// 计算一个病例的配准误差. 未配对的点不参与平均, 只计数.
pub fn registration_error(correspondence: &Correspondence) -> CaseAccuracy {
    let landmarks: Vec<LandmarkError> = correspondence
        .matched()
        .map(|(s, t)| LandmarkError {
            source: s.clone(),
            target: t.clone(),
            distance: linalg::distance(&s.position, &t.position),
        })
        .collect();
    let mean = (!landmarks.is_empty())
        .then(|| landmarks.iter().map(|e| e.distance).sum::<f64>() / landmarks.len() as f64);
    CaseAccuracy {
        landmarks,
        mean,
        unmatched: correspondence.unmatched(),
    }
}

/// 队列误差: 各病例平均误差的算术平均.
pub fn cohort_mean<I: IntoIterator<Item = f64>>(case_means: I) -> Result<f64, EmptyCohortError> {
    let (sum, n) = case_means
        .into_iter()
        .fold((0.0, 0usize), |(s, n), m| (s + m, n + 1));
    if n == 0 {
        Err(EmptyCohortError)
    } else {
        Ok(sum / n as f64)
    }
}

/// 所有病例全部已配对点的合并平均误差.
pub fn pooled_mean<'a, I>(cases: I) -> Result<f64, EmptyCohortError>
where
    I: IntoIterator<Item = &'a CaseAccuracy>,
{
    cohort_mean(
        cases
            .into_iter()
            .flat_map(|c| c.landmarks.iter().map(|e| e.distance)),
    )
}

/// 一对按位置配对的目标点的偏差.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct TargetDeviation {
    /// 下标.
    pub index: usize,
    /// 人工流程变换后的目标点.
    pub manual: Fiducial,
    /// 自动流程变换后的目标点.
    pub automatic: Fiducial,
    /// 欧氏距离, 毫米.
    pub distance: f64,
}

/// 靶向敏感度: 将第 `i` 个人工目标点与第 `i` 个自动目标点比较.
///
/// 两组点个数不同时返回 [`MetricError::CardinalityMismatch`].
pub fn targeting_sensitivity(
    manual: &LandmarkSet,
    automatic: &LandmarkSet,
) -> Result<Vec<TargetDeviation>, MetricError> {
    if manual.len() != automatic.len() {
        return Err(MetricError::CardinalityMismatch {
            reference: manual.len(),
            moving: automatic.len(),
        });
    }
    Ok(manual
        .iter()
        .zip(automatic.iter())
        .enumerate()
        .map(|(index, (m, a))| TargetDeviation {
            index,
            manual: m.clone(),
            automatic: a.clone(),
            distance: linalg::distance(&m.position, &a.position),
        })
        .collect())
}
