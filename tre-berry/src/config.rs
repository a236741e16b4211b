//! 评估配置.
//!
//! 所有与数据集版本相关的约定 (文件名模式, 必需证据, 病例白名单等) 都通过
//! [`EngineConfig`] 注入, 评估逻辑本身不写死任何病例编号或路径.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::consts::COVER_PROSTATE;
use crate::dataset::discovery::PatternSet;
use crate::evidence::{ArtifactKey, CaseId, FiducialRole, Pipeline, RegType, Stage};
use crate::metrics::LabelRange;

/// 计算 LRE 时参考点集 (变换后的术前基准点) 的来源.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceLandmarks {
    /// 直接读取病例中已存在的变换后点集.
    Stored(ArtifactKey),
    /// 用 `pipeline` 的变换 (按回退策略选择) 变换术前基准点.
    Transformed {
        /// 分割流程.
        pipeline: Pipeline,
        /// 请求的配准类型.
        requested: RegType,
    },
    /// 用运行元数据中已批准的变换变换术前基准点.
    Approved,
}

impl Default for ReferenceLandmarks {
    fn default() -> Self {
        Self::Stored(ArtifactKey::transformed(FiducialRole::Landmarks, None, None))
    }
}

/// 判断病例是否参与评估的谓词.
pub type CasePredicate = Arc<dyn Fn(&CaseId) -> bool + Send + Sync>;

/// 参与评估的病例集合.
#[derive(Clone, Default)]
pub enum CohortFilter {
    /// 所有发现的病例.
    #[default]
    All,
    /// 只有编号在白名单中的病例.
    Allowlist(BTreeSet<String>),
    /// 任意谓词.
    Predicate(CasePredicate),
}

impl fmt::Debug for CohortFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::Allowlist(ids) => f.debug_tuple("Allowlist").field(ids).finish(),
            Self::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

impl CohortFilter {
    /// 由一组病例编号创建白名单.
    pub fn allowlist<S: Into<String>, I: IntoIterator<Item = S>>(ids: I) -> Self {
        Self::Allowlist(ids.into_iter().map(Into::into).collect())
    }

    /// 病例是否参与评估?
    pub fn accepts(&self, id: &CaseId) -> bool {
        match self {
            Self::All => true,
            Self::Allowlist(ids) => ids.contains(id.as_str()),
            Self::Predicate(p) => p(id),
        }
    }
}

/// 评估引擎的配置.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 文件名模式.
    pub patterns: PatternSet,
    /// 完整病例必须具备的证据. 缺失任何一项的病例被标记为不完整.
    pub required: Vec<ArtifactKey>,
    /// LRE 参考点集的来源.
    pub reference: ReferenceLandmarks,
    /// 计算 Dice 的阶段. 每个阶段比较人工分割 (参考) 与自动分割.
    pub dice_stages: Vec<Stage>,
    /// 二值化阈值.
    pub label_range: LabelRange,
    /// 覆盖前列腺序列的规范标记.
    pub series_token: String,
    /// 参与评估的病例.
    pub cohort: CohortFilter,
    /// 运行元数据所在的根目录. 为 `None` 时只在病例目录中查找.
    pub metadata_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            patterns: PatternSet::default(),
            required: vec![
                ArtifactKey::fiducials(FiducialRole::Landmarks, Stage::Intraop),
                ArtifactKey::fiducials(FiducialRole::Landmarks, Stage::Preop),
            ],
            reference: ReferenceLandmarks::default(),
            dice_stages: vec![Stage::Preop, Stage::Intraop],
            label_range: LabelRange::default(),
            series_token: COVER_PROSTATE.to_owned(),
            cohort: CohortFilter::All,
            metadata_root: None,
        }
    }
}

impl EngineConfig {
    /// 替换文件名模式.
    pub fn with_patterns(mut self, patterns: PatternSet) -> Self {
        self.patterns = patterns;
        self
    }

    /// 替换必需证据.
    pub fn with_required(mut self, required: Vec<ArtifactKey>) -> Self {
        self.required = required;
        self
    }

    /// 替换参考点集来源.
    pub fn with_reference(mut self, reference: ReferenceLandmarks) -> Self {
        self.reference = reference;
        self
    }

    /// 替换计算 Dice 的阶段.
    pub fn with_dice_stages(mut self, stages: Vec<Stage>) -> Self {
        self.dice_stages = stages;
        self
    }

    /// 替换二值化阈值.
    pub fn with_label_range(mut self, range: LabelRange) -> Self {
        self.label_range = range;
        self
    }

    /// 替换序列标记.
    pub fn with_series_token(mut self, token: impl Into<String>) -> Self {
        self.series_token = token.into();
        self
    }

    /// 替换病例过滤.
    pub fn with_cohort(mut self, cohort: CohortFilter) -> Self {
        self.cohort = cohort;
        self
    }

    /// 设置运行元数据的根目录.
    pub fn with_metadata_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.metadata_root = Some(root.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cohort_filter() {
        let all = CohortFilter::default();
        assert!(all.accepts(&CaseId::from("1")));

        let allow = CohortFilter::allowlist(["278", "301"]);
        assert!(allow.accepts(&CaseId::from("301")));
        assert!(!allow.accepts(&CaseId::from("302")));

        let odd = CohortFilter::Predicate(Arc::new(|id: &CaseId| {
            id.number().is_some_and(|n| n % 2 == 1)
        }));
        assert!(odd.accepts(&CaseId::from("7")));
        assert!(!odd.accepts(&CaseId::from("8")));
        assert_eq!(format!("{odd:?}"), "Predicate(..)");
    }
}
