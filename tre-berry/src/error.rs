//! 运行时错误.
//!
//! 错误按影响范围分层: 单个文件 ([`StoreError`]) 与单个病例
//! ([`ReconciliationError`], [`MetricError`]) 的错误只会让该病例被标记为不完整,
//! 只有队列级别的错误 ([`EmptyCohortError`], [`EvalError`]) 才会中止整次运行.

use std::path::PathBuf;
use thiserror::Error;

use crate::evidence::ArtifactKey;

/// 证据存储 ([`crate::dataset::ArtifactStore`]) 读取错误.
#[derive(Debug, Error)]
pub enum StoreError {
    /// 期望的文件不存在. 总是可恢复的.
    #[error("artifact not found: {path}")]
    NotFound {
        /// 缺失的路径.
        path: PathBuf,
    },

    /// 底层 I/O 错误.
    #[error("failed to read {path}: {source}")]
    Io {
        /// 出错的路径.
        path: PathBuf,
        /// 原始错误.
        #[source]
        source: std::io::Error,
    },

    /// nifti 文件解析错误.
    #[error("failed to load nifti volume {path}: {source}")]
    Nifti {
        /// 出错的路径.
        path: PathBuf,
        /// 原始错误.
        #[source]
        source: nifti::NiftiError,
    },

    /// fcsv 等表格文件解析错误.
    #[error("failed to parse table {path}: {source}")]
    Csv {
        /// 出错的路径.
        path: PathBuf,
        /// 原始错误.
        #[source]
        source: csv::Error,
    },

    /// JSON 元数据解析错误.
    #[error("failed to parse metadata {path}: {source}")]
    Json {
        /// 出错的路径.
        path: PathBuf,
        /// 原始错误.
        #[source]
        source: serde_json::Error,
    },

    /// 文件内容不符合预期格式.
    #[error("malformed artifact {path}: {reason}")]
    Malformed {
        /// 出错的路径.
        path: PathBuf,
        /// 具体原因.
        reason: String,
    },

    /// 该存储不支持此类文件格式 (如 `.nrrd`, `.h5`).
    #[error("unsupported artifact format: {path}")]
    Unsupported {
        /// 出错的路径.
        path: PathBuf,
    },
}

impl StoreError {
    /// 是否为 "文件缺失" 错误.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// 运行元数据自相矛盾或不足以确定唯一答案.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// 元数据文件不存在.
    #[error("run metadata {path} does not exist")]
    MetadataMissing {
        /// 期望的元数据路径.
        path: PathBuf,
    },

    /// 元数据无法读取或解析.
    #[error("run metadata is unreadable: {0}")]
    Metadata(#[source] StoreError),

    /// 所有消歧规则都无法选出已批准的配准结果.
    #[error("no approved `{token}` registration could be resolved for case {case}")]
    Unresolved {
        /// 病例编号.
        case: String,
        /// 规范序列标记, 如 `COVER PROSTATE`.
        token: String,
    },

    /// 被选中的配准类型没有对应的变换文件.
    #[error("case {case}: resolved registration type {reg_type} has no transform")]
    MissingTransform {
        /// 病例编号.
        case: String,
        /// 被选中的配准类型.
        reg_type: String,
    },
}

/// 指标计算的输入不兼容.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricError {
    /// 体素网格的方向矩阵奇异, 无法在两个坐标系之间重采样.
    #[error("the {0} grid has a singular or non-finite direction/spacing")]
    DegenerateGrid(&'static str),

    /// 体素数据形状与网格尺寸不一致.
    #[error("voxel data shape {found:?} does not match grid size {expected:?}")]
    ShapeMismatch {
        /// 网格给出的 (z, h, w).
        expected: (usize, usize, usize),
        /// 实际数据的 (z, h, w).
        found: (usize, usize, usize),
    },

    /// 按位置配对的两组点个数不同.
    #[error("positional pairing needs equal cardinality, got {reference} and {moving}")]
    CardinalityMismatch {
        /// 参考点集大小.
        reference: usize,
        /// 待比较点集大小.
        moving: usize,
    },
}

/// 在零个合格病例上请求队列平均值.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cohort mean requested over zero qualifying cases")]
pub struct EmptyCohortError;

/// 单个病例某项指标无法计算的原因. 只影响该病例.
#[derive(Debug, Error)]
pub enum CaseFailure {
    /// 病例中没有识别到所需的证据.
    #[error("missing evidence {0}")]
    Missing(ArtifactKey),

    /// 证据读取失败.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 消歧失败.
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    /// 指标计算失败.
    #[error(transparent)]
    Metric(#[from] MetricError),
}

impl CaseFailure {
    /// 是否为证据缺失 (而非证据本身有问题)?
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Missing(_) => true,
            Self::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// 队列级别 (整次运行) 的终止错误.
#[derive(Debug, Error)]
pub enum EvalError {
    /// 根目录本身无法读取.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 消歧失败.
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    /// 指标计算失败.
    #[error(transparent)]
    Metric(#[from] MetricError),

    /// 没有任何完整的病例.
    #[error(transparent)]
    EmptyCohort(#[from] EmptyCohortError),
}

/// 证据存储读取结果.
pub type StoreResult<T> = Result<T, StoreError>;

/// 队列评估结果.
pub type EvalResult<T> = Result<T, EvalError>;
