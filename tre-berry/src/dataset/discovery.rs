//! 病例发现: 把目录树中的文件按文件名模式归入各病例.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dataset::ArtifactStore;
use crate::error::StoreResult;
use crate::evidence::{
    Artifact, ArtifactKey, ArtifactKind, Case, CaseId, FiducialRole, Pipeline, RegType, Stage,
};

static CASE_IN_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"Case(\d+)-").unwrap());

/// 体数据文件扩展名.
const VOLUME_EXT: &str = r"\.(?:nrrd|nii|nii\.gz|mha)$";

/// 变换文件扩展名.
const TRANSFORM_EXT: &str = r"\.(?:h5|tfm|txt)$";

const STAGE: &str = "(?P<stage>preop|intraop)";
const PIPELINE: &str = "(?P<pipeline>manual|automatic)";
const REG: &str = "(?P<reg>rigid|affine|bspline)";
const ROLE: &str = "(?P<role>landmarks|targets)";

static DEFAULT_PATTERNS: Lazy<PatternSet> = Lazy::new(|| {
    let landmarks = ArtifactKey::fiducials(FiducialRole::Landmarks, Stage::Preop);
    let transformed = ArtifactKey::transformed(FiducialRole::Landmarks, None, None);
    let label = ArtifactKey::new(ArtifactKind::LabelVolume, None, None, None);
    let volume = ArtifactKey::new(ArtifactKind::Volume, None, None, None);
    let registered = ArtifactKey::new(
        ArtifactKind::Volume,
        Some(Stage::Preop),
        Some(Pipeline::Automatic),
        None,
    );
    let transform = ArtifactKey::new(ArtifactKind::Transform, None, Some(Pipeline::Automatic), None);
    let manual_transform = ArtifactKey::new(ArtifactKind::Transform, None, Some(Pipeline::Manual), None);

    let table = [
        (format!(r"-{STAGE}{ROLE}\.fcsv$"), landmarks),
        (
            format!(r"-preop{ROLE}-transformed-{REG}-{PIPELINE}\.fcsv$"),
            transformed,
        ),
        (format!(r"-preop{ROLE}-transformed_{PIPELINE}\.fcsv$"), transformed),
        (format!(r"-preop{ROLE}-transformed\.fcsv$"), transformed),
        (format!(r"-{STAGE}{PIPELINE}-label{VOLUME_EXT}"), label),
        (format!(r"-{STAGE}label_{PIPELINE}{VOLUME_EXT}"), label),
        (format!(r"-{STAGE}volume{VOLUME_EXT}"), volume),
        (format!(r"-VOLUME-{REG}(?:-{PIPELINE})?{VOLUME_EXT}"), registered),
        (format!(r"-TRANSFORM-{REG}(?:-{PIPELINE})?{TRANSFORM_EXT}"), transform),
        (format!(r"-manual-transform{TRANSFORM_EXT}"), manual_transform),
        (r"^results\.json$".to_owned(), ArtifactKey::metadata()),
    ];
    PatternSet {
        patterns: table
            .into_iter()
            .map(|(re, key)| ArtifactPattern::new(&format!("(?i){re}"), key).unwrap())
            .collect(),
    }
});

/// 文件名模式. 命名分组 `stage`, `pipeline`, `reg`, `role` 覆盖模板键中对应的标记.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    regex: Regex,
    template: ArtifactKey,
}

impl ArtifactPattern {
    /// 以正则表达式和模板键创建.
    pub fn new(regex: &str, template: ArtifactKey) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(regex)?,
            template,
        })
    }

    /// 尝试识别文件名. 不匹配, 或命名分组的内容无法识别时返回 `None`.
    pub fn classify(&self, file_name: &str) -> Option<ArtifactKey> {
        let caps = self.regex.captures(file_name)?;
        let mut key = self.template;
        if let Some(m) = caps.name("stage") {
            key.stage = Some(m.as_str().parse().ok()?);
        }
        if let Some(m) = caps.name("pipeline") {
            key.pipeline = Some(m.as_str().parse().ok()?);
        }
        if let Some(m) = caps.name("reg") {
            key.reg_type = Some(m.as_str().parse::<RegType>().ok()?);
        }
        if let Some(m) = caps.name("role") {
            let role = m.as_str().parse().ok()?;
            key.kind = match key.kind {
                ArtifactKind::Fiducials(_) => ArtifactKind::Fiducials(role),
                ArtifactKind::TransformedFiducials(_) => ArtifactKind::TransformedFiducials(role),
                other => other,
            };
        }
        Some(key)
    }
}

/// 一组有序的文件名模式. 第一个匹配的模式生效.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<ArtifactPattern>,
}

impl Default for PatternSet {
    fn default() -> Self {
        DEFAULT_PATTERNS.clone()
    }
}

impl PatternSet {
    /// 不含任何模式的集合.
    #[inline]
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// 追加模式. 追加的模式优先级最低.
    pub fn push(&mut self, pattern: ArtifactPattern) -> &mut Self {
        self.patterns.push(pattern);
        self
    }

    /// 模式个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// 识别文件名.
    pub fn classify(&self, file_name: &str) -> Option<ArtifactKey> {
        self.patterns.iter().find_map(|p| p.classify(file_name))
    }
}

/// 从路径中 `Case<数字>-` 形式的片段提取病例编号.
pub fn case_id_from_path(path: &Path) -> Option<CaseId> {
    let s = path.to_string_lossy();
    let caps = CASE_IN_PATH.captures(&s)?;
    Some(CaseId::new(caps.get(1)?.as_str()))
}

/// 由病例目录名得到病例编号: 优先使用 `Case<数字>-` 片段, 否则为目录名本身.
pub fn case_id_from_dir_name(name: &str) -> CaseId {
    case_id_from_path(Path::new(name)).unwrap_or_else(|| CaseId::new(name))
}

/// 扫描 `root` 的每个直接子目录, 将其中 (递归) 的文件按 `patterns` 归入病例.
///
/// 文件按路径顺序访问, 因此同一键的冲突总是由排序靠后的文件胜出.
/// 多个目录解析为同一病例编号时合并为一个病例. 结果按病例编号排序.
/// 无法读取的病例目录只记入该病例的 [`Case::failures`], 不影响其他病例;
/// 只有 `root` 本身无法列出时才返回错误.
pub fn discover<S: ArtifactStore + ?Sized>(
    store: &S,
    root: &Path,
    patterns: &PatternSet,
) -> StoreResult<Vec<Case>> {
    let mut cases: BTreeMap<CaseId, Case> = BTreeMap::new();
    for entry in store.list_dir(root)?.into_iter().filter(|e| e.is_dir) {
        let id = case_id_from_dir_name(&entry.name);
        let case = cases
            .entry(id.clone())
            .or_insert_with(|| Case::new(id, &entry.path));

        let files = match store.walk_files(&entry.path) {
            Ok(files) => files,
            Err(e) => {
                log::warn!("case {}: directory unreadable, {e}", case.id());
                case.note_failure(e.to_string());
                continue;
            }
        };
        let mut recognized = 0usize;
        for path in files {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
                continue;
            };
            if let Some(key) = patterns.classify(&name) {
                case.insert(Artifact {
                    key,
                    path: path.clone(),
                });
                recognized += 1;
            }
        }
        log::debug!(
            "case {}: {} artifacts recognized in {}",
            case.id(),
            recognized,
            entry.path.display()
        );
    }
    Ok(cases.into_values().collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::data::{AffineTransform, LabelVolume, LandmarkSet, ScanVolume};
    use crate::dataset::{DirEntry, MemArtifact, MemStore, Probe};
    use crate::error::StoreError;

    /// 在 `denied` 目录上遍历失败的存储, 其余操作交给内层存储.
    pub(crate) struct DeniedDir<S> {
        pub(crate) inner: S,
        pub(crate) denied: PathBuf,
    }

    impl<S: ArtifactStore> ArtifactStore for DeniedDir<S> {
        fn probe(&self, path: &Path) -> Probe {
            self.inner.probe(path)
        }

        fn list_dir(&self, dir: &Path) -> StoreResult<Vec<DirEntry>> {
            self.inner.list_dir(dir)
        }

        fn walk_files(&self, root: &Path) -> StoreResult<Vec<PathBuf>> {
            if root == self.denied {
                return Err(StoreError::Io {
                    path: root.to_owned(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            self.inner.walk_files(root)
        }

        fn read_text(&self, path: &Path) -> StoreResult<String> {
            self.inner.read_text(path)
        }

        fn load_landmark_set(&self, path: &Path) -> StoreResult<LandmarkSet> {
            self.inner.load_landmark_set(path)
        }

        fn load_label_volume(&self, path: &Path) -> StoreResult<LabelVolume> {
            self.inner.load_label_volume(path)
        }

        fn load_volume(&self, path: &Path) -> StoreResult<ScanVolume> {
            self.inner.load_volume(path)
        }

        fn load_transform(&self, path: &Path) -> StoreResult<AffineTransform> {
            self.inner.load_transform(path)
        }
    }

    fn classify(name: &str) -> Option<ArtifactKey> {
        PatternSet::default().classify(name)
    }

    #[test]
    fn test_classify_fiducials() {
        assert_eq!(
            classify("278-IntraopLandmarks.fcsv"),
            Some(ArtifactKey::fiducials(FiducialRole::Landmarks, Stage::Intraop))
        );
        assert_eq!(
            classify("278-PreopTargets.fcsv"),
            Some(ArtifactKey::fiducials(FiducialRole::Targets, Stage::Preop))
        );
        assert_eq!(
            classify("278-PreopTargets-transformed-bSpline-Manual.fcsv"),
            Some(ArtifactKey::transformed(
                FiducialRole::Targets,
                Some(Pipeline::Manual),
                Some(RegType::BSpline)
            ))
        );
        assert_eq!(
            classify("278-PreopLandmarks-transformed_AUTOMATIC.fcsv"),
            Some(ArtifactKey::transformed(
                FiducialRole::Landmarks,
                Some(Pipeline::Automatic),
                None
            ))
        );
        assert_eq!(
            classify("278-PreopLandmarks-transformed.fcsv"),
            Some(ArtifactKey::transformed(FiducialRole::Landmarks, None, None))
        );
    }

    #[test]
    fn test_classify_volumes_and_transforms() {
        assert_eq!(
            classify("278-IntraopManual-label.nrrd"),
            Some(ArtifactKey::label(Stage::Intraop, Pipeline::Manual))
        );
        assert_eq!(
            classify("278-PreopLabel_Automatic.nii.gz"),
            Some(ArtifactKey::label(Stage::Preop, Pipeline::Automatic))
        );
        assert_eq!(
            classify("278-PreopVolume.nrrd"),
            Some(ArtifactKey::volume(Stage::Preop))
        );
        assert_eq!(
            classify("278-VOLUME-affine-Manual.nrrd"),
            Some(ArtifactKey::registered_volume(RegType::Affine, Pipeline::Manual))
        );
        // 没有流程标记时视为自动分割的产物.
        assert_eq!(
            classify("278-TRANSFORM-bSpline.h5"),
            Some(ArtifactKey::transform(RegType::BSpline, Pipeline::Automatic))
        );
        assert_eq!(
            classify("278-Manual-transform.tfm").map(|k| (k.kind, k.pipeline, k.reg_type)),
            Some((ArtifactKind::Transform, Some(Pipeline::Manual), None))
        );
        assert_eq!(classify("results.json"), Some(ArtifactKey::metadata()));
        assert_eq!(classify("old-results.json"), None);
        assert_eq!(classify("278-TRANSFORM-spline.h5"), None);
        assert_eq!(classify("notes.txt"), None);
    }

    #[test]
    fn test_case_id() {
        assert_eq!(
            case_id_from_path(Path::new("/a/Case278-20170101/MRgBiopsy/results.json")),
            Some(CaseId::from("278"))
        );
        assert_eq!(case_id_from_path(Path::new("/a/278/x")), None);
        assert_eq!(case_id_from_dir_name("Case12-x"), CaseId::from("12"));
        assert_eq!(case_id_from_dir_name("12"), CaseId::from("12"));
    }

    #[test]
    fn test_discover() {
        let store = MemStore::new()
            .with("/lm/10/10-IntraopLandmarks.fcsv", MemArtifact::Opaque)
            .with("/lm/10/10-PreopLandmarks.fcsv", MemArtifact::Opaque)
            .with("/lm/10/readme.md", MemArtifact::Opaque)
            .with("/lm/9/9-IntraopLandmarks.fcsv", MemArtifact::Opaque)
            .with("/lm/9/sub/9-IntraopLandmarks.fcsv", MemArtifact::Opaque)
            .with("/lm/stray.txt", MemArtifact::Opaque);

        let cases = discover(&store, Path::new("/lm"), &PatternSet::default()).unwrap();
        let ids: Vec<_> = cases.iter().map(|c| c.id().as_str()).collect();
        assert_eq!(ids, ["9", "10"]);
        assert_eq!(cases[1].len(), 2);

        // 冲突时排序靠后的文件胜出.
        let key = ArtifactKey::fiducials(FiducialRole::Landmarks, Stage::Intraop);
        assert_eq!(
            cases[0].path(&key),
            Some(Path::new("/lm/9/sub/9-IntraopLandmarks.fcsv"))
        );
    }

    #[test]
    fn test_discover_unreadable_case_dir() {
        let store = DeniedDir {
            inner: MemStore::new()
                .with("/lm/9/9-IntraopLandmarks.fcsv", MemArtifact::Opaque)
                .with("/lm/10/10-IntraopLandmarks.fcsv", MemArtifact::Opaque),
            denied: PathBuf::from("/lm/9"),
        };
        let cases = discover(&store, Path::new("/lm"), &PatternSet::default()).unwrap();
        let ids: Vec<_> = cases.iter().map(|c| c.id().as_str()).collect();
        assert_eq!(ids, ["9", "10"]);

        assert!(cases[0].is_empty());
        assert_eq!(cases[0].failures().len(), 1);
        assert!(cases[0].failures()[0].contains("denied"));
        assert!(!cases[0].is_complete());

        assert_eq!(cases[1].len(), 1);
        assert!(cases[1].failures().is_empty());
    }
}
