//! 运行元数据 (`results.json`).
//!
//! 元数据有两个版本: 旧版的 `results` 是以 `"{序列号}: {描述}"` 为键的对象,
//! 新版的 `results` 是数组, 且包含手术事件和术前信息. 两者在读取后统一升级为
//! [`RegistrationResult`], 之后的逻辑不再关心版本差异.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::consts::{COVER_PROSTATE, COVER_PROSTATE_FILE_TOKEN, GUIDANCE_SERIES};
use crate::error::{StoreError, StoreResult};
use crate::evidence::RegType;

static SERIES_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)").unwrap());

/// 配准结果的审批状态.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Status {
    /// 等待审批.
    Pending,
    /// 已批准.
    Approved,
    /// 被拒绝.
    Rejected,
    /// 被跳过.
    Skipped,
    /// 无法识别的状态, 保留原文.
    Other(String),
}

impl Status {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "skipped" => Self::Skipped,
            _ => Self::Other(s.to_owned()),
        }
    }

    /// 状态文本.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
            Self::Other(s) => s,
        }
    }
}

/// 用户对自动分割的修改记录.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[serde(rename_all = "camelCase")]
pub struct UserModification {
    /// 开始时间.
    pub start_time: Option<String>,
    /// 结束时间.
    pub end_time: Option<String>,
}

/// 分割记录.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[serde(rename_all = "camelCase")]
pub struct Segmentation {
    /// 分割算法.
    pub algorithm: Option<String>,
    /// 开始时间.
    pub start_time: Option<String>,
    /// 结束时间.
    pub end_time: Option<String>,
    /// 若用户修改过分割, 记录修改时间.
    pub user_modified: Option<UserModification>,
}

/// 版本无关的配准结果.
///
/// 所有文件路径已相对元数据所在目录解析.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationResult {
    /// 原始名称, 如 `"5: COVER PROSTATE"`.
    pub name: String,
    /// 序列号. 名称不以数字开头时为 `None`.
    pub series_number: Option<u32>,
    /// 序列描述.
    pub description: String,
    /// 序列类型 (仅新版), 如 `GUIDANCE`.
    pub series_type: Option<String>,
    /// 序列接收时间 (仅新版).
    pub received_time: Option<String>,
    /// 审批状态.
    pub status: Status,
    /// 状态变更时间 (仅新版).
    pub status_time: Option<String>,
    /// 批准人 (仅新版).
    pub consent_given_by: Option<String>,
    /// 被批准的配准类型.
    pub approved_type: Option<RegType>,
    /// 各配准类型的变换文件.
    pub transforms: BTreeMap<RegType, PathBuf>,
    /// 各配准类型配准后的体.
    pub volumes: BTreeMap<RegType, PathBuf>,
    /// 各配准类型变换后的目标点.
    pub targets: BTreeMap<RegType, PathBuf>,
    /// 被批准的目标点.
    pub approved_targets: Option<PathBuf>,
    /// 术中 (fixed) 标签体.
    pub fixed_label: Option<PathBuf>,
    /// 术前 (moving) 标签体.
    pub moving_label: Option<PathBuf>,
    /// 术中 (fixed) 扫描体.
    pub fixed_volume: Option<PathBuf>,
    /// 术前 (moving) 扫描体.
    pub moving_volume: Option<PathBuf>,
    /// 分割记录.
    pub segmentation: Option<Segmentation>,
}

/// 从 `"5: COVER PROSTATE"` 形式的名称中提取序列号.
pub fn series_number(name: &str) -> Option<u32> {
    SERIES_NUMBER.captures(name)?.get(1)?.as_str().parse().ok()
}

fn description(name: &str) -> String {
    name.split_once(": ")
        .map_or(name, |(_, desc)| desc)
        .to_owned()
}

/// 文件引用: 字符串, 或带 `fileName` 的对象.
fn file_ref(base: &Path, value: &Value) -> Option<PathBuf> {
    let name = match value {
        Value::String(s) => s.as_str(),
        Value::Object(o) => o.get("fileName")?.as_str()?,
        _ => return None,
    };
    (!name.is_empty()).then(|| base.join(name))
}

/// 按配准类型索引的文件表. 其它键被忽略.
fn typed_refs(base: &Path, map: &BTreeMap<String, Value>) -> BTreeMap<RegType, PathBuf> {
    map.iter()
        .filter_map(|(k, v)| Some((k.parse().ok()?, file_ref(base, v)?)))
        .collect()
}

fn keyed_ref(base: &Path, map: &BTreeMap<String, Value>, key: &str) -> Option<PathBuf> {
    file_ref(base, map.get(key)?)
}

fn flat_ref(base: &Path, name: &Option<String>) -> Option<PathBuf> {
    name.as_deref()
        .filter(|n| !n.is_empty())
        .map(|n| base.join(n))
}

/// 旧版配准结果.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyResult {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    approved_registration_type: Option<String>,
    #[serde(default)]
    transforms: BTreeMap<String, Value>,
    #[serde(default)]
    volumes: BTreeMap<String, Value>,
    #[serde(default)]
    targets: BTreeMap<String, Value>,
    #[serde(default)]
    approved_targets: Option<Value>,
    #[serde(default)]
    fixed_label: Option<String>,
    #[serde(default)]
    moving_label: Option<String>,
    #[serde(default)]
    fixed_volume: Option<String>,
    #[serde(default)]
    moving_volume: Option<String>,
}

impl LegacyResult {
    fn upgrade(&self, name: &str, base: &Path) -> RegistrationResult {
        let approved_targets = self
            .approved_targets
            .as_ref()
            .and_then(|v| file_ref(base, v))
            .or_else(|| keyed_ref(base, &self.targets, "approved"));
        RegistrationResult {
            name: name.to_owned(),
            series_number: series_number(name),
            description: description(name),
            series_type: None,
            received_time: None,
            status: self
                .status
                .as_deref()
                .map_or(Status::Pending, Status::parse),
            status_time: None,
            consent_given_by: None,
            approved_type: self
                .approved_registration_type
                .as_deref()
                .and_then(|t| t.parse().ok()),
            transforms: typed_refs(base, &self.transforms),
            volumes: typed_refs(base, &self.volumes),
            targets: typed_refs(base, &self.targets),
            approved_targets,
            fixed_label: flat_ref(base, &self.fixed_label),
            moving_label: flat_ref(base, &self.moving_label),
            fixed_volume: flat_ref(base, &self.fixed_volume),
            moving_volume: flat_ref(base, &self.moving_volume),
            segmentation: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesInfo {
    #[serde(rename = "type")]
    kind: Option<String>,
    received_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusInfo {
    state: Option<String>,
    time: Option<String>,
    consent_given_by: Option<String>,
    registration_type: Option<String>,
}

/// 新版配准结果.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentResult {
    name: String,
    #[serde(default)]
    series: SeriesInfo,
    #[serde(default)]
    status: StatusInfo,
    #[serde(default)]
    labels: BTreeMap<String, Value>,
    #[serde(default)]
    volumes: BTreeMap<String, Value>,
    #[serde(default)]
    targets: BTreeMap<String, Value>,
    #[serde(default)]
    transforms: BTreeMap<String, Value>,
    #[serde(default)]
    segmentation: Option<Segmentation>,
}

impl CurrentResult {
    fn upgrade(&self, base: &Path) -> RegistrationResult {
        RegistrationResult {
            name: self.name.clone(),
            series_number: series_number(&self.name),
            description: description(&self.name),
            series_type: self.series.kind.clone(),
            received_time: self.series.received_time.clone(),
            status: self
                .status
                .state
                .as_deref()
                .map_or(Status::Pending, Status::parse),
            status_time: self.status.time.clone(),
            consent_given_by: self.status.consent_given_by.clone(),
            approved_type: self
                .status
                .registration_type
                .as_deref()
                .and_then(|t| t.parse().ok()),
            transforms: typed_refs(base, &self.transforms),
            volumes: typed_refs(base, &self.volumes),
            targets: typed_refs(base, &self.targets),
            approved_targets: keyed_ref(base, &self.targets, "approved"),
            fixed_label: keyed_ref(base, &self.labels, "fixed"),
            moving_label: keyed_ref(base, &self.labels, "moving"),
            fixed_volume: keyed_ref(base, &self.volumes, "fixed"),
            moving_volume: keyed_ref(base, &self.volumes, "moving"),
            segmentation: self.segmentation.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Timestamp {
    time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcedureEvents {
    case_started: Option<String>,
    case_completed: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreopInfo {
    #[serde(rename = "usedERC")]
    used_erc: Option<bool>,
    segmentation: Option<Segmentation>,
}

/// 旧版元数据.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyDocument {
    results: BTreeMap<String, LegacyResult>,
}

/// 新版元数据.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentDocument {
    results: Vec<CurrentResult>,
    #[serde(default)]
    procedure_events: ProcedureEvents,
    #[serde(default)]
    preop: Option<PreopInfo>,
}

/// 病例的手术概况 (仅新版元数据提供).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct CaseInfo {
    /// 手术开始时间.
    pub started: Option<String>,
    /// 手术结束时间.
    pub completed: Option<String>,
    /// 是否使用了术前影像.
    pub preop_used: bool,
    /// 术前是否使用了直肠内线圈.
    pub used_erc: Option<bool>,
    /// 术前分割记录.
    pub preop_segmentation: Option<Segmentation>,
}

/// 穿刺针引导序列: 已批准的 `GUIDANCE` 结果.
#[derive(Debug, Clone, PartialEq)]
pub struct NeedleSeries {
    /// 序列号.
    pub series_number: Option<u32>,
    /// 术中标签体.
    pub label: Option<PathBuf>,
    /// 术中扫描体.
    pub volume: Option<PathBuf>,
    /// 被批准的目标点.
    pub targets: Option<PathBuf>,
}

/// 已解析的元数据, 按版本区分.
#[derive(Debug, Clone)]
pub enum MetadataDocument {
    /// 旧版.
    Legacy(LegacyDocument),
    /// 新版.
    Current(CurrentDocument),
}

impl MetadataDocument {
    /// 解析 JSON 文本. 版本由 `results` 字段的形状决定. `path` 仅用于错误信息.
    pub fn parse(text: &str, path: &Path) -> StoreResult<Self> {
        let json_err = |source| StoreError::Json {
            path: path.to_owned(),
            source,
        };
        let value: Value = serde_json::from_str(text).map_err(json_err)?;
        let legacy = match value.get("results") {
            Some(Value::Object(_)) => Some(true),
            Some(Value::Array(_)) => Some(false),
            _ => None,
        };
        match legacy {
            Some(true) => serde_json::from_value(value)
                .map(Self::Legacy)
                .map_err(json_err),
            Some(false) => serde_json::from_value(value)
                .map(Self::Current)
                .map_err(json_err),
            None => Err(StoreError::Malformed {
                path: path.to_owned(),
                reason: "`results` must be an object or an array".to_owned(),
            }),
        }
    }

    /// 升级为版本无关的配准结果. 文件路径相对 `base` 解析.
    ///
    /// 旧版结果的顺序为键的字典序, 新版保留文件中的顺序.
    pub fn results(&self, base: &Path) -> Vec<RegistrationResult> {
        match self {
            Self::Legacy(doc) => doc
                .results
                .iter()
                .map(|(name, r)| r.upgrade(name, base))
                .collect(),
            Self::Current(doc) => doc.results.iter().map(|r| r.upgrade(base)).collect(),
        }
    }

    /// 手术概况. 旧版元数据没有这些信息, 返回 `None`.
    pub fn case_info(&self) -> Option<CaseInfo> {
        let Self::Current(doc) = self else {
            return None;
        };
        let events = &doc.procedure_events;
        Some(CaseInfo {
            started: events.case_started.clone(),
            completed: events.case_completed.as_ref().and_then(|c| c.time.clone()),
            preop_used: doc.preop.is_some(),
            used_erc: doc.preop.as_ref().and_then(|p| p.used_erc),
            preop_segmentation: doc.preop.as_ref().and_then(|p| p.segmentation.clone()),
        })
    }

    /// 所有已批准的穿刺针引导序列.
    pub fn needle_series(&self, base: &Path) -> Vec<NeedleSeries> {
        self.results(base)
            .into_iter()
            .filter(|r| {
                r.status == Status::Approved && r.series_type.as_deref() == Some(GUIDANCE_SERIES)
            })
            .map(|r| NeedleSeries {
                series_number: r.series_number,
                label: r.fixed_label,
                volume: r.fixed_volume,
                targets: r.approved_targets,
            })
            .collect()
    }
}

impl RegistrationResult {
    /// 从病例目录的文件清单构造一个合成的覆盖前列腺结果. 在元数据缺少候选结果时使用.
    ///
    /// 清单中含 `-T2-COVER-PROSTATE-` 的第一个文件决定序列前缀, 之后只考虑以该前缀开头的文件:
    /// `*-approved.fcsv` 为被批准的目标点, `*-<type>.fcsv` 为变换后的目标点,
    /// `*-<type>.h5` / `*-<type>.tfm` 为变换.
    pub fn from_directory_listing<S: AsRef<str>>(dir: &Path, names: &[S]) -> Option<Self> {
        let cover = names
            .iter()
            .map(AsRef::as_ref)
            .find(|n| n.contains(COVER_PROSTATE_FILE_TOKEN))?;
        let series = cover.split('-').next()?;
        let prefix = format!("{series}-");

        let mut ans = Self {
            name: format!("{series}: {COVER_PROSTATE}"),
            series_number: series_number(series),
            description: COVER_PROSTATE.to_owned(),
            series_type: None,
            received_time: None,
            status: Status::Approved,
            status_time: None,
            consent_given_by: None,
            approved_type: None,
            transforms: BTreeMap::new(),
            volumes: BTreeMap::new(),
            targets: BTreeMap::new(),
            approved_targets: None,
            fixed_label: None,
            moving_label: None,
            fixed_volume: None,
            moving_volume: None,
            segmentation: None,
        };
        for name in names.iter().map(AsRef::as_ref) {
            if !name.starts_with(&prefix) {
                continue;
            }
            let Some((stem, ext)) = name.rsplit_once('.') else {
                continue;
            };
            let Some((_, tag)) = stem.rsplit_once('-') else {
                continue;
            };
            let path = dir.join(name);
            match (tag, ext) {
                ("approved", "fcsv") => ans.approved_targets = Some(path),
                (tag, "fcsv") => {
                    if let Ok(t) = tag.parse() {
                        ans.targets.insert(t, path);
                    }
                }
                (tag, "h5" | "tfm") => {
                    if let Ok(t) = tag.parse() {
                        ans.transforms.insert(t, path);
                    }
                }
                _ => {}
            }
        }
        Some(ans)
    }

    /// 是否被批准?
    #[inline]
    pub fn is_approved(&self) -> bool {
        self.status == Status::Approved
    }

    /// 被批准配准类型的变换文件.
    pub fn approved_transform(&self) -> Option<(RegType, &Path)> {
        let t = self.approved_type?;
        self.transforms.get(&t).map(|p| (t, p.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"{
        "results": {
            "12: COVER PROSTATE": {
                "status": "approved",
                "approvedRegistrationType": "bSpline",
                "transforms": {"rigid": "12-T-rigid.h5", "bSpline": "12-T-bSpline.h5"},
                "targets": {"rigid": "12-rigid.fcsv", "approved": "12-approved.fcsv"},
                "movingLabel": "preop-label.nrrd",
                "fixedLabel": "12-label.nrrd"
            },
            "9: COVER PROSTATE": {"status": "rejected"}
        }
    }"#;

    const CURRENT: &str = r#"{
        "procedureEvents": {"caseStarted": "t0", "caseCompleted": {"time": "t9"}},
        "preop": {"usedERC": true, "segmentation": {"algorithm": "Manual", "startTime": "a", "endTime": "b"}},
        "results": [
            {
                "name": "4: COVER PROSTATE",
                "series": {"type": "COVER PROSTATE", "receivedTime": "r"},
                "status": {"state": "approved", "time": "s", "consentGivenBy": "dr", "registrationType": "affine"},
                "labels": {"fixed": "4-label.nrrd", "moving": "preop.nrrd"},
                "volumes": {"fixed": "4.nrrd", "affine": "4-VOLUME-affine.nrrd"},
                "targets": {"approved": {"fileName": "4-approved.fcsv"}, "affine": {"fileName": "4-affine.fcsv"}},
                "transforms": {"affine": {"fileName": "4-affine.h5"}},
                "segmentation": {"algorithm": "BasicUNet", "startTime": "x", "endTime": "y",
                                 "userModified": {"startTime": "u0", "endTime": "u1"}}
            },
            {
                "name": "7: NEEDLE GUIDANCE 7",
                "series": {"type": "GUIDANCE"},
                "status": {"state": "approved"},
                "labels": {"fixed": "7-label.nrrd"},
                "volumes": {"fixed": "7.nrrd"},
                "targets": {"approved": {"fileName": "7-approved.fcsv"}}
            }
        ]
    }"#;

    #[test]
    fn test_series_number() {
        assert_eq!(series_number("12: COVER PROSTATE"), Some(12));
        assert_eq!(series_number(" 3: X"), Some(3));
        assert_eq!(series_number("COVER PROSTATE"), None);
    }

    #[test]
    fn test_legacy_upgrade() {
        let base = Path::new("/case");
        let doc = MetadataDocument::parse(LEGACY, Path::new("results.json")).unwrap();
        assert!(matches!(doc, MetadataDocument::Legacy(_)));
        assert!(doc.case_info().is_none());

        let results = doc.results(base);
        assert_eq!(results.len(), 2);
        let cover = results.iter().find(|r| r.series_number == Some(12)).unwrap();
        assert!(cover.is_approved());
        assert_eq!(cover.description, "COVER PROSTATE");
        assert_eq!(
            cover.approved_transform(),
            Some((RegType::BSpline, Path::new("/case/12-T-bSpline.h5")))
        );
        assert_eq!(cover.targets.len(), 1);
        assert_eq!(
            cover.approved_targets.as_deref(),
            Some(Path::new("/case/12-approved.fcsv"))
        );
        assert_eq!(
            cover.moving_label.as_deref(),
            Some(Path::new("/case/preop-label.nrrd"))
        );
        let other = results.iter().find(|r| r.series_number == Some(9)).unwrap();
        assert_eq!(other.status, Status::Rejected);
        assert!(other.approved_transform().is_none());
    }

    #[test]
    fn test_current_upgrade() {
        let base = Path::new("/case");
        let doc = MetadataDocument::parse(CURRENT, Path::new("results.json")).unwrap();
        let results = doc.results(base);
        assert_eq!(results[0].approved_type, Some(RegType::Affine));
        assert_eq!(results[0].consent_given_by.as_deref(), Some("dr"));
        assert_eq!(
            results[0].volumes.get(&RegType::Affine).map(PathBuf::as_path),
            Some(Path::new("/case/4-VOLUME-affine.nrrd"))
        );
        let seg = results[0].segmentation.as_ref().unwrap();
        assert_eq!(seg.user_modified.as_ref().unwrap().end_time.as_deref(), Some("u1"));

        let info = doc.case_info().unwrap();
        assert_eq!(info.completed.as_deref(), Some("t9"));
        assert!(info.preop_used);
        assert_eq!(info.used_erc, Some(true));

        let needles = doc.needle_series(base);
        assert_eq!(needles.len(), 1);
        assert_eq!(needles[0].series_number, Some(7));
        assert_eq!(needles[0].label.as_deref(), Some(Path::new("/case/7-label.nrrd")));
    }

    #[test]
    fn test_bad_results_field() {
        let err = MetadataDocument::parse(r#"{"results": 3}"#, Path::new("r.json")).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
        let err = MetadataDocument::parse("{", Path::new("r.json")).unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }

    #[test]
    fn test_from_directory_listing() {
        let names = [
            "5-T2-COVER-PROSTATE-20170101.nrrd",
            "5-approved.fcsv",
            "5-rigid.fcsv",
            "5-bSpline.fcsv",
            "5-rigid.h5",
            "5-bSpline.h5",
            "6-affine.fcsv",
        ];
        let r = RegistrationResult::from_directory_listing(Path::new("/d"), &names).unwrap();
        assert_eq!(r.series_number, Some(5));
        assert_eq!(r.targets.len(), 2);
        assert_eq!(r.transforms.len(), 2);
        assert!(r.approved_targets.is_some());
        assert!(r.approved_type.is_none());

        assert!(RegistrationResult::from_directory_listing(Path::new("/d"), &["x.nrrd"]).is_none());
    }
}
