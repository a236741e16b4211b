//! 病例证据模型: 病例, 文件 (artifact) 及其来源标记.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

pub mod metadata;

/// 无法识别的阶段 / 流程 / 配准类型标记.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized tag `{0}`")]
pub struct UnknownTag(pub String);

/// 采集阶段.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Stage {
    /// 术前 (MRI).
    Preop,
    /// 术中.
    Intraop,
}

/// 分割流程.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Pipeline {
    /// 人工分割.
    Manual,
    /// 自动 (深度学习) 分割.
    Automatic,
}

/// 配准类型, 自由度递增.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum RegType {
    /// 刚体.
    Rigid,
    /// 仿射.
    Affine,
    /// 形变 (B 样条).
    BSpline,
}

impl RegType {
    /// 回退顺序: 从最精细到最粗糙.
    pub const PRECEDENCE: [RegType; 3] = [RegType::BSpline, RegType::Affine, RegType::Rigid];

    /// 文件名和元数据中使用的写法.
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rigid => "rigid",
            Self::Affine => "affine",
            Self::BSpline => "bSpline",
        }
    }

    /// 从 `self` 开始 (含) 按回退顺序迭代.
    pub fn fallbacks_from(self) -> impl Iterator<Item = RegType> {
        Self::PRECEDENCE.into_iter().skip_while(move |t| *t != self)
    }
}

impl Stage {
    /// 文件名中使用的写法.
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preop => "Preop",
            Self::Intraop => "Intraop",
        }
    }
}

impl Pipeline {
    /// 文件名中使用的写法.
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "Manual",
            Self::Automatic => "Automatic",
        }
    }
}

macro_rules! impl_tag {
    ($t: ident { $($lit: literal => $v: expr),+ $(,)? }) => {
        impl FromStr for $t {
            type Err = UnknownTag;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($lit => Ok($v),)+
                    _ => Err(UnknownTag(s.to_owned())),
                }
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_tag!(Stage { "preop" => Stage::Preop, "intraop" => Stage::Intraop });
impl_tag!(Pipeline { "manual" => Pipeline::Manual, "automatic" => Pipeline::Automatic });
impl_tag!(RegType {
    "rigid" => RegType::Rigid,
    "affine" => RegType::Affine,
    "bspline" => RegType::BSpline,
});

/// 基准点文件的用途.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum FiducialRole {
    /// 解剖标志点, 用于 LRE.
    Landmarks,
    /// 活检目标点, 用于 TRE.
    Targets,
}

impl FiducialRole {
    /// 文件名中使用的写法.
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Landmarks => "Landmarks",
            Self::Targets => "Targets",
        }
    }
}

impl_tag!(FiducialRole { "landmarks" => FiducialRole::Landmarks, "targets" => FiducialRole::Targets });

/// 文件种类.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum ArtifactKind {
    /// 人工标注的基准点.
    Fiducials(FiducialRole),
    /// 经配准变换后的术前基准点.
    TransformedFiducials(FiducialRole),
    /// 标签体 (分割结果).
    LabelVolume,
    /// 扫描体. 带配准类型时为配准后的体.
    Volume,
    /// 配准变换.
    Transform,
    /// 运行元数据 (`results.json`).
    RunMetadata,
}

/// 文件在病例内的唯一键: (种类, 阶段, 流程, 配准类型).
///
/// 不适用的标记为 `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ArtifactKey {
    /// 种类.
    pub kind: ArtifactKind,
    /// 阶段.
    pub stage: Option<Stage>,
    /// 分割流程.
    pub pipeline: Option<Pipeline>,
    /// 配准类型.
    pub reg_type: Option<RegType>,
}

impl ArtifactKey {
    /// 直接初始化.
    #[inline]
    pub const fn new(
        kind: ArtifactKind,
        stage: Option<Stage>,
        pipeline: Option<Pipeline>,
        reg_type: Option<RegType>,
    ) -> Self {
        Self {
            kind,
            stage,
            pipeline,
            reg_type,
        }
    }

    /// 某阶段人工标注的基准点, 如 `IntraopLandmarks`.
    #[inline]
    pub const fn fiducials(role: FiducialRole, stage: Stage) -> Self {
        Self::new(ArtifactKind::Fiducials(role), Some(stage), None, None)
    }

    /// 变换后的术前基准点.
    #[inline]
    pub const fn transformed(
        role: FiducialRole,
        pipeline: Option<Pipeline>,
        reg_type: Option<RegType>,
    ) -> Self {
        Self::new(
            ArtifactKind::TransformedFiducials(role),
            Some(Stage::Preop),
            pipeline,
            reg_type,
        )
    }

    /// 某阶段某流程的标签体.
    #[inline]
    pub const fn label(stage: Stage, pipeline: Pipeline) -> Self {
        Self::new(ArtifactKind::LabelVolume, Some(stage), Some(pipeline), None)
    }

    /// 某阶段的原始扫描体.
    #[inline]
    pub const fn volume(stage: Stage) -> Self {
        Self::new(ArtifactKind::Volume, Some(stage), None, None)
    }

    /// 配准后的术前扫描体.
    #[inline]
    pub const fn registered_volume(reg_type: RegType, pipeline: Pipeline) -> Self {
        Self::new(
            ArtifactKind::Volume,
            Some(Stage::Preop),
            Some(pipeline),
            Some(reg_type),
        )
    }

    /// 配准变换.
    #[inline]
    pub const fn transform(reg_type: RegType, pipeline: Pipeline) -> Self {
        Self::new(ArtifactKind::Transform, None, Some(pipeline), Some(reg_type))
    }

    /// 运行元数据.
    #[inline]
    pub const fn metadata() -> Self {
        Self::new(ArtifactKind::RunMetadata, None, None, None)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = self.stage.map_or("", Stage::as_str);
        match self.kind {
            ArtifactKind::Fiducials(role) => write!(f, "{stage}{role}")?,
            ArtifactKind::TransformedFiducials(role) => write!(f, "{stage}{role}-transformed")?,
            ArtifactKind::LabelVolume => write!(f, "{stage}-label")?,
            ArtifactKind::Volume if self.reg_type.is_some() => f.write_str("VOLUME")?,
            ArtifactKind::Volume => write!(f, "{stage}Volume")?,
            ArtifactKind::Transform => f.write_str("TRANSFORM")?,
            ArtifactKind::RunMetadata => f.write_str("results.json")?,
        }
        if let Some(reg) = self.reg_type {
            write!(f, "-{reg}")?;
        }
        if let Some(pipeline) = self.pipeline {
            write!(f, "-{pipeline}")?;
        }
        Ok(())
    }
}

/// 一个被识别的文件.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// 唯一键.
    pub key: ArtifactKey,
    /// 文件路径.
    pub path: PathBuf,
}

/// 病例编号. 若为纯数字则按数值排序, 否则按字典序.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct CaseId(String);

impl CaseId {
    /// 直接初始化.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 原始字符串.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 数值编号. 非纯数字时返回 `None`.
    #[inline]
    pub fn number(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Ord for CaseId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.number(), other.number()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for CaseId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CaseId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// 一个病例及其所有已识别的文件. 每次扫描都重新构建, 从不持久化.
#[derive(Debug, Clone)]
pub struct Case {
    id: CaseId,
    dir: PathBuf,
    artifacts: BTreeMap<ArtifactKey, PathBuf>,
    missing: Vec<ArtifactKey>,
    failures: Vec<String>,
}

impl Case {
    /// 创建不含任何文件的病例.
    pub fn new(id: CaseId, dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            dir: dir.into(),
            artifacts: BTreeMap::new(),
            missing: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// 病例编号.
    #[inline]
    pub fn id(&self) -> &CaseId {
        &self.id
    }

    /// 病例目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 加入一个文件. 同一键已存在时以新文件为准并记录警告, 返回被覆盖的路径.
    pub fn insert(&mut self, artifact: Artifact) -> Option<PathBuf> {
        let Artifact { key, path } = artifact;
        let old = self.artifacts.insert(key, path);
        if let Some(old) = &old {
            log::warn!(
                "case {}: `{}` matched more than once, {} overrides {}",
                self.id,
                key,
                self.artifacts[&key].display(),
                old.display()
            );
        }
        old
    }

    /// 获取某键对应的文件.
    #[inline]
    pub fn get(&self, key: &ArtifactKey) -> Option<Artifact> {
        self.path(key).map(|path| Artifact {
            key: *key,
            path: path.to_owned(),
        })
    }

    /// 获取某键对应的文件路径.
    #[inline]
    pub fn path(&self, key: &ArtifactKey) -> Option<&Path> {
        self.artifacts.get(key).map(PathBuf::as_path)
    }

    /// 是否包含某键?
    #[inline]
    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.artifacts.contains_key(key)
    }

    /// 按键的顺序迭代所有文件.
    pub fn iter(&self) -> impl Iterator<Item = (&ArtifactKey, &Path)> {
        self.artifacts.iter().map(|(k, p)| (k, p.as_path()))
    }

    /// 文件个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// 是否没有识别到任何文件?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// 按给定的必需键重新计算缺失列表.
    pub fn mark_required<'a, I: IntoIterator<Item = &'a ArtifactKey>>(&mut self, required: I) {
        self.missing = required
            .into_iter()
            .filter(|k| !self.artifacts.contains_key(k))
            .copied()
            .collect();
    }

    /// 缺失的必需文件.
    #[inline]
    pub fn missing(&self) -> &[ArtifactKey] {
        &self.missing
    }

    /// 记录扫描该病例时遇到的错误 (如目录无法读取).
    pub fn note_failure(&mut self, reason: impl Into<String>) {
        self.failures.push(reason.into());
    }

    /// 扫描该病例时遇到的错误.
    #[inline]
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// 必需文件是否齐全, 且扫描时没有出错?
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.failures.is_empty()
    }
}
