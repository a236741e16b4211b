//! 消歧: 在证据缺失或自相矛盾时给出唯一确定的答案.
//!
//! 1. 变换回退: 请求的配准类型不可用时, 按 `bSpline -> affine -> rigid` 回退.
//! 2. 已批准结果的解析: 先看审批状态, 再看变换后目标点与已批准目标点的距离.

use std::path::{Path, PathBuf};

use crate::consts::META_FILENAME;
use crate::dataset::ArtifactStore;
use crate::error::ReconciliationError;
use crate::evidence::metadata::{MetadataDocument, RegistrationResult};
use crate::evidence::{ArtifactKey, ArtifactKind, Case, CaseId, Pipeline, RegType};
use crate::linalg;
use crate::Vec3;

/// 变换选择结果.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformChoice {
    /// 被请求的配准类型.
    pub requested: RegType,
    /// 实际选中的配准类型. 使用了未标注类型的人工变换时为 `None`.
    pub reg_type: Option<RegType>,
    /// 变换文件.
    pub path: PathBuf,
}

impl TransformChoice {
    /// 是否发生了回退?
    #[inline]
    pub fn is_fallback(&self) -> bool {
        self.reg_type != Some(self.requested)
    }
}

/// 为 `pipeline` 选择 `requested` 类型的变换, 必要时回退.
///
/// 某类型可用, 当且仅当其变换和配准后的体都存在. 都不可用时, 人工流程可退而使用
/// 未标注类型的人工变换 (`<case>-Manual-transform.*`). 发生回退时记录一次日志.
pub fn select_transform(
    case: &Case,
    pipeline: Pipeline,
    requested: RegType,
) -> Option<TransformChoice> {
    let typed = requested.fallbacks_from().find_map(|t| {
        let volume = ArtifactKey::registered_volume(t, pipeline);
        if !case.contains(&volume) {
            return None;
        }
        let path = case.path(&ArtifactKey::transform(t, pipeline))?;
        Some(TransformChoice {
            requested,
            reg_type: Some(t),
            path: path.to_owned(),
        })
    });

    let choice = typed.or_else(|| {
        let untyped = ArtifactKey::new(ArtifactKind::Transform, None, Some(pipeline), None);
        case.path(&untyped).map(|path| TransformChoice {
            requested,
            reg_type: None,
            path: path.to_owned(),
        })
    });

    match &choice {
        Some(c) if c.is_fallback() => log::info!(
            "case {}: no usable {} {} transform, falling back to {}",
            case.id(),
            pipeline,
            requested,
            c.reg_type.map_or("untyped manual", RegType::as_str)
        ),
        Some(_) => {}
        None => log::warn!(
            "case {}: no usable {} transform for {} or any coarser type",
            case.id(),
            pipeline,
            requested
        ),
    }
    choice
}

/// 已批准结果是如何确定的.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Resolution {
    /// 元数据中明确的审批状态.
    ApprovedStatus,
    /// 变换后目标点与已批准目标点距离最小的类型.
    TargetDistance {
        /// 最小距离, 毫米.
        distance: f64,
    },
    /// 同上, 但候选结果来自病例目录的文件清单.
    DirectoryListing {
        /// 最小距离, 毫米.
        distance: f64,
    },
}

/// 被解析出的已批准配准结果.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedRegistration {
    /// 序列号.
    pub series_number: Option<u32>,
    /// 序列名称.
    pub series_name: String,
    /// 配准类型.
    pub reg_type: RegType,
    /// 变换文件.
    pub transform: PathBuf,
    /// 确定方式.
    pub resolution: Resolution,
    /// 术前标签体.
    pub preop_label: Option<PathBuf>,
    /// 术中标签体.
    pub intraop_label: Option<PathBuf>,
}

/// 确定病例运行元数据的位置.
///
/// 依次尝试: 病例中已识别的元数据文件; `metadata_root` 下路径含 `Case<id>-` 的
/// `results.json`; 病例目录下的 `results.json` (可能不存在).
pub fn locate_metadata<S: ArtifactStore + ?Sized>(
    store: &S,
    case: &Case,
    metadata_root: Option<&Path>,
) -> PathBuf {
    if let Some(path) = case.path(&ArtifactKey::metadata()) {
        return path.to_owned();
    }
    let needle = format!("Case{}-", case.id());
    let found = metadata_root.and_then(|root| {
        store
            .walk_files(root)
            .ok()?
            .into_iter()
            .find(|p| {
                p.file_name().is_some_and(|n| n == META_FILENAME)
                    && p.to_string_lossy().contains(&needle)
            })
    });
    found.unwrap_or_else(|| case.dir().join(META_FILENAME))
}

/// 从运行元数据中解析已批准的配准结果.
///
/// 元数据没有任何结果时, 改用元数据所在目录的文件清单构造候选.
pub fn resolve_approved<S: ArtifactStore + ?Sized>(
    store: &S,
    case: &CaseId,
    metadata: &Path,
    token: &str,
) -> Result<ApprovedRegistration, ReconciliationError> {
    if !store.exists(metadata) {
        return Err(ReconciliationError::MetadataMissing {
            path: metadata.to_owned(),
        });
    }
    let base = metadata.parent().unwrap_or(Path::new(""));
    let text = store
        .read_text(metadata)
        .map_err(ReconciliationError::Metadata)?;
    let doc = MetadataDocument::parse(&text, metadata).map_err(ReconciliationError::Metadata)?;

    let results = doc.results(base);
    if !results.is_empty() {
        return resolve_among(store, case, results, token);
    }

    log::info!(
        "case {case}: {} lists no results, parsing the case directory instead",
        metadata.display()
    );
    let names: Vec<String> = store
        .list_dir(base)
        .map_err(ReconciliationError::Metadata)?
        .into_iter()
        .filter(|e| !e.is_dir)
        .map(|e| e.name)
        .collect();
    let candidates: Vec<_> = RegistrationResult::from_directory_listing(base, &names)
        .into_iter()
        .collect();
    let mut ans = resolve_among(store, case, candidates, token)?;
    if let Resolution::TargetDistance { distance } = ans.resolution {
        ans.resolution = Resolution::DirectoryListing { distance };
    }
    Ok(ans)
}

/// 第一个目标点. 读取失败时记录警告并返回 `None`.
fn first_target<S: ArtifactStore + ?Sized>(store: &S, case: &CaseId, path: &Path) -> Option<Vec3> {
    match store.load_landmark_set(path) {
        Ok(set) => set.first_position(),
        Err(e) => {
            log::warn!("case {case}: skipping targets: {e}");
            None
        }
    }
}

/// 在候选结果中消歧.
///
/// 1. 按序列号升序排序 (无法解析的排在最后, 其余保持原顺序);
/// 2. 第一个状态为已批准, 名称含 `token`, 且被批准类型有变换文件的结果;
/// 3. 否则在名称含 `token` 的结果中 (若没有则在所有结果中), 按顺序找到第一个能计算距离的结果,
///    取第一个变换后目标点与第一个已批准目标点距离最小的类型. 距离相同时按
///    `bSpline, affine, rigid` 的顺序取先者.
pub fn resolve_among<S: ArtifactStore + ?Sized>(
    store: &S,
    case: &CaseId,
    mut candidates: Vec<RegistrationResult>,
    token: &str,
) -> Result<ApprovedRegistration, ReconciliationError> {
    candidates.sort_by_key(|r| (r.series_number.is_none(), r.series_number));

    let approved = candidates
        .iter()
        .filter(|r| r.is_approved() && r.name.contains(token))
        .find_map(|r| r.approved_transform().map(|(t, p)| (r, t, p.to_owned())));
    if let Some((r, reg_type, transform)) = approved {
        log::debug!("case {case}: `{}` is approved with {reg_type}", r.name);
        return Ok(approved_registration(r, reg_type, transform, Resolution::ApprovedStatus));
    }

    let matching: Vec<&RegistrationResult> =
        candidates.iter().filter(|r| r.name.contains(token)).collect();
    let pool = if matching.is_empty() {
        candidates.iter().collect()
    } else {
        matching
    };

    for r in pool {
        let Some(reference) = r
            .approved_targets
            .as_deref()
            .and_then(|p| first_target(store, case, p))
        else {
            continue;
        };

        let mut best: Option<(RegType, f64)> = None;
        for t in RegType::PRECEDENCE {
            let Some(path) = r.targets.get(&t) else {
                continue;
            };
            let Some(p) = first_target(store, case, path) else {
                continue;
            };
            let d = linalg::distance(&p, &reference);
            if best.map_or(true, |(_, b)| d < b) {
                best = Some((t, d));
            }
        }

        if let Some((reg_type, distance)) = best {
            log::info!(
                "case {case}: `{}` resolved to {reg_type} by target distance {distance:.3} mm",
                r.name
            );
            let transform = r.transforms.get(&reg_type).cloned().ok_or_else(|| {
                ReconciliationError::MissingTransform {
                    case: case.to_string(),
                    reg_type: reg_type.to_string(),
                }
            })?;
            return Ok(approved_registration(
                r,
                reg_type,
                transform,
                Resolution::TargetDistance { distance },
            ));
        }
    }

    Err(ReconciliationError::Unresolved {
        case: case.to_string(),
        token: token.to_owned(),
    })
}

fn approved_registration(
    r: &RegistrationResult,
    reg_type: RegType,
    transform: PathBuf,
    resolution: Resolution,
) -> ApprovedRegistration {
    ApprovedRegistration {
        series_number: r.series_number,
        series_name: r.name.clone(),
        reg_type,
        transform,
        resolution,
        preop_label: r.moving_label.clone(),
        intraop_label: r.fixed_label.clone(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use once_cell::sync::Lazy;

    use super::*;
    use crate::data::{Fiducial, LandmarkSet};
    use crate::dataset::{MemArtifact, MemStore};
    use crate::evidence::metadata::Status;
    use crate::evidence::Artifact;

    /// 记录所有日志的测试 logger. 测试并行运行, 断言时应按病例编号过滤.
    struct CaptureLogger;

    static CAPTURED: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(Vec::new()));

    impl log::Log for CaptureLogger {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            CAPTURED
                .lock()
                .unwrap()
                .push(format!("{} {}", record.level(), record.args()));
        }

        fn flush(&self) {}
    }

    static LOGGER: CaptureLogger = CaptureLogger;

    /// 安装测试 logger. 断言日志的测试应在调用被测函数之前安装.
    pub(crate) fn install_capture() {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);
    }

    /// 返回已记录的含 `needle` 的日志.
    pub(crate) fn captured_logs(needle: &str) -> Vec<String> {
        install_capture();
        CAPTURED
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.contains(needle))
            .cloned()
            .collect()
    }

    fn point_set(p: Vec3) -> MemArtifact {
        MemArtifact::Landmarks([Fiducial::new("T-1", p)].into_iter().collect::<LandmarkSet>())
    }

    fn case_with(id: &str, keys: &[ArtifactKey]) -> Case {
        let mut case = Case::new(CaseId::from(id), format!("/lm/{id}"));
        for (i, key) in keys.iter().enumerate() {
            case.insert(Artifact {
                key: *key,
                path: format!("/lm/{id}/{i}").into(),
            });
        }
        case
    }

    fn result(name: &str) -> RegistrationResult {
        RegistrationResult {
            name: name.to_owned(),
            series_number: crate::evidence::metadata::series_number(name),
            description: String::new(),
            series_type: None,
            received_time: None,
            status: Status::Pending,
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
        }
    }

    #[test]
    fn test_select_transform_fallback_logged_once() {
        install_capture();
        let a = Pipeline::Automatic;
        let case = case_with(
            "90001",
            &[
                ArtifactKey::transform(RegType::BSpline, a),
                ArtifactKey::transform(RegType::Affine, a),
                ArtifactKey::registered_volume(RegType::Affine, a),
                ArtifactKey::transform(RegType::Rigid, a),
                ArtifactKey::registered_volume(RegType::Rigid, a),
            ],
        );
        let choice = select_transform(&case, a, RegType::BSpline).unwrap();
        assert_eq!(choice.reg_type, Some(RegType::Affine));
        assert!(choice.is_fallback());
        assert_eq!(
            Some(choice.path.as_path()),
            case.path(&ArtifactKey::transform(RegType::Affine, a))
        );

        let logs = captured_logs("case 90001:");
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("falling back to affine"));
    }

    #[test]
    fn test_select_transform_no_fallback() {
        install_capture();
        let m = Pipeline::Manual;
        let case = case_with(
            "90002",
            &[
                ArtifactKey::transform(RegType::BSpline, m),
                ArtifactKey::registered_volume(RegType::BSpline, m),
            ],
        );
        let choice = select_transform(&case, m, RegType::BSpline).unwrap();
        assert!(!choice.is_fallback());
        assert!(captured_logs("case 90002:").is_empty());

        // 自动流程没有任何变换, 此时记录一条警告.
        assert!(select_transform(&case, Pipeline::Automatic, RegType::BSpline).is_none());
        let logs = captured_logs("case 90002:");
        assert_eq!(logs.len(), 1);
        assert!(logs[0].starts_with("WARN"));
    }

    #[test]
    fn test_select_untyped_manual_transform() {
        let case = case_with(
            "90003",
            &[ArtifactKey::new(
                ArtifactKind::Transform,
                None,
                Some(Pipeline::Manual),
                None,
            )],
        );
        let choice = select_transform(&case, Pipeline::Manual, RegType::Rigid).unwrap();
        assert_eq!(choice.reg_type, None);
        assert!(choice.is_fallback());
    }

    #[test]
    fn test_resolve_by_approved_status() {
        let store = MemStore::new();
        let mut later = result("8: COVER PROSTATE");
        later.status = Status::Approved;
        later.approved_type = Some(RegType::Rigid);
        later.transforms.insert(RegType::Rigid, "/c/8-rigid.h5".into());
        let mut first = result("5: COVER PROSTATE");
        first.status = Status::Approved;
        first.approved_type = Some(RegType::BSpline);
        first.transforms.insert(RegType::BSpline, "/c/5-bSpline.h5".into());
        let mut guidance = result("3: GUIDANCE");
        guidance.status = Status::Approved;

        let ans = resolve_among(
            &store,
            &CaseId::from("1"),
            vec![later, guidance, first],
            "COVER PROSTATE",
        )
        .unwrap();
        assert_eq!(ans.series_number, Some(5));
        assert_eq!(ans.reg_type, RegType::BSpline);
        assert_eq!(ans.resolution, Resolution::ApprovedStatus);
    }

    #[test]
    fn test_resolve_by_target_distance() {
        let store = MemStore::new()
            .with("/c/approved.fcsv", point_set([0.0, 0.0, 0.0]))
            .with("/c/rigid.fcsv", point_set([2.0, 0.0, 0.0]))
            .with("/c/affine.fcsv", point_set([0.0, 0.5, 0.0]));
        let mut r = result("5: COVER PROSTATE");
        r.approved_targets = Some("/c/approved.fcsv".into());
        r.targets.insert(RegType::Rigid, "/c/rigid.fcsv".into());
        r.targets.insert(RegType::Affine, "/c/affine.fcsv".into());
        r.transforms.insert(RegType::Rigid, "/c/rigid.h5".into());
        r.transforms.insert(RegType::Affine, "/c/affine.h5".into());

        let ans = resolve_among(&store, &CaseId::from("2"), vec![r.clone()], "COVER PROSTATE")
            .unwrap();
        assert_eq!(ans.reg_type, RegType::Affine);
        assert_eq!(ans.transform, Path::new("/c/affine.h5"));
        assert_eq!(ans.resolution, Resolution::TargetDistance { distance: 0.5 });

        // 最小距离的类型没有变换文件.
        r.transforms.remove(&RegType::Affine);
        let err = resolve_among(&store, &CaseId::from("2"), vec![r], "COVER PROSTATE").unwrap_err();
        assert!(matches!(err, ReconciliationError::MissingTransform { .. }));
    }

    #[test]
    fn test_resolve_unresolved() {
        let store = MemStore::new();
        let mut r = result("5: COVER PROSTATE");
        r.approved_targets = Some("/c/missing.fcsv".into());
        let err = resolve_among(&store, &CaseId::from("3"), vec![r], "COVER PROSTATE").unwrap_err();
        assert!(matches!(err, ReconciliationError::Unresolved { .. }));
    }

    #[test]
    fn test_resolve_approved_from_metadata() {
        let legacy = r#"{"results": {"5: COVER PROSTATE": {
            "status": "approved", "approvedRegistrationType": "bSpline",
            "transforms": {"bSpline": "5-bSpline.h5"},
            "movingLabel": "preop-label.nrrd", "fixedLabel": "5-label.nrrd"}}}"#;
        let store = MemStore::new().with("/c/results.json", MemArtifact::Text(legacy.into()));
        let ans = resolve_approved(
            &store,
            &CaseId::from("4"),
            Path::new("/c/results.json"),
            "COVER PROSTATE",
        )
        .unwrap();
        assert_eq!(ans.transform, Path::new("/c/5-bSpline.h5"));
        assert_eq!(ans.preop_label.as_deref(), Some(Path::new("/c/preop-label.nrrd")));

        let err = resolve_approved(
            &store,
            &CaseId::from("4"),
            Path::new("/c/nope/results.json"),
            "COVER PROSTATE",
        )
        .unwrap_err();
        assert!(matches!(err, ReconciliationError::MetadataMissing { .. }));
    }

    #[test]
    fn test_resolve_from_directory_listing() {
        let store = MemStore::new()
            .with("/c/results.json", MemArtifact::Text(r#"{"results": {}}"#.into()))
            .with("/c/6-T2-COVER-PROSTATE-1.nrrd", MemArtifact::Opaque)
            .with("/c/6-approved.fcsv", point_set([0.0, 0.0, 0.0]))
            .with("/c/6-bSpline.fcsv", point_set([0.0, 0.0, 1.0]))
            .with("/c/6-rigid.fcsv", point_set([0.0, 0.0, 3.0]))
            .with("/c/6-bSpline.h5", MemArtifact::Opaque)
            .with("/c/6-rigid.h5", MemArtifact::Opaque);
        let ans = resolve_approved(
            &store,
            &CaseId::from("5"),
            Path::new("/c/results.json"),
            "COVER PROSTATE",
        )
        .unwrap();
        assert_eq!(ans.reg_type, RegType::BSpline);
        assert_eq!(ans.resolution, Resolution::DirectoryListing { distance: 1.0 });
    }

    #[test]
    fn test_locate_metadata() {
        let store = MemStore::new()
            .with("/archive/Case7-2017/MRgBiopsy/results.json", MemArtifact::Opaque)
            .with("/archive/Case70-2017/MRgBiopsy/results.json", MemArtifact::Opaque);
        let case = Case::new(CaseId::from("7"), "/lm/7");
        assert_eq!(
            locate_metadata(&store, &case, Some(Path::new("/archive"))),
            Path::new("/archive/Case7-2017/MRgBiopsy/results.json")
        );
        assert_eq!(
            locate_metadata(&store, &case, None),
            Path::new("/lm/7/results.json")
        );
    }
}
