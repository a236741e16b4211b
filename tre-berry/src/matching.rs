//! 基准点对应关系: 按标签后缀配对两组独立产生的点集.

use crate::data::{Fiducial, LandmarkSet};
use crate::linalg;
use crate::Vec3;

/// 带原始下标的基准点.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct IndexedFiducial {
    /// 在所属点集中的下标.
    pub index: usize,
    /// 标签.
    pub label: String,
    /// RAS 坐标.
    pub position: Vec3,
}

impl IndexedFiducial {
    fn new(index: usize, f: &Fiducial) -> Self {
        Self {
            index,
            label: f.label.clone(),
            position: f.position,
        }
    }
}

/// 一对对应点. `source` 为 `None` 表示参考点没有找到对应.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct CorrespondencePair {
    /// 被搜索点集中的对应点.
    pub source: Option<IndexedFiducial>,
    /// 参考点.
    pub target: IndexedFiducial,
}

impl CorrespondencePair {
    /// 是否找到了对应点?
    #[inline]
    pub fn is_matched(&self) -> bool {
        self.source.is_some()
    }

    /// 两点的欧氏距离. 未配对时为 `None`.
    #[inline]
    pub fn distance(&self) -> Option<f64> {
        self.source
            .as_ref()
            .map(|s| linalg::distance(&s.position, &self.target.position))
    }
}

/// 配对结果, 按参考点集的顺序排列.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Correspondence {
    pairs: Vec<CorrespondencePair>,
    unmatched: usize,
}

impl Correspondence {
    /// 所有配对, 含未配对的参考点.
    #[inline]
    pub fn pairs(&self) -> &[CorrespondencePair] {
        &self.pairs
    }

    /// 未配对的参考点个数.
    #[inline]
    pub fn unmatched(&self) -> usize {
        self.unmatched
    }

    /// 参考点个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// 迭代所有成功配对的 `(source, target)`.
    pub fn matched(&self) -> impl Iterator<Item = (&IndexedFiducial, &IndexedFiducial)> {
        self.pairs
            .iter()
            .filter_map(|p| p.source.as_ref().map(|s| (s, &p.target)))
    }
}

/// 标签的匹配键: 最后一个 `-` 之后的部分. 没有 `-` 时为整个标签.
#[inline]
pub fn suffix_key(label: &str) -> &str {
    label.rsplit_once('-').map_or(label, |(_, key)| key)
}

/// `label` 是否以 `-{key}` 结尾或恰好等于 `key`?
#[inline]
fn has_suffix(label: &str, key: &str) -> bool {
    label == key
        || label
            .strip_suffix(key)
            .is_some_and(|head| head.ends_with('-'))
}

/// 按参考点集 `reference` 的顺序, 在 `source` 中为每个参考点找到第一个标签后缀相同的点.
///
/// 找不到时生成一个未配对项并计数, 而不是失败. 复杂度 `O(n * m)`.
pub fn match_by_suffix(source: &LandmarkSet, reference: &LandmarkSet) -> Correspondence {
    let mut ans = Correspondence::default();
    for (i, r) in reference.iter().enumerate() {
        let key = suffix_key(&r.label);
        let found = source
            .iter()
            .enumerate()
            .find(|(_, s)| has_suffix(&s.label, key))
            .map(|(j, s)| IndexedFiducial::new(j, s));
        if found.is_none() {
            ans.unmatched += 1;
        }
        ans.pairs.push(CorrespondencePair {
            source: found,
            target: IndexedFiducial::new(i, r),
        });
    }
    ans
}
