use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::data::{AffineTransform, LabelVolume, LandmarkSet, ScanVolume};
use crate::dataset::{ArtifactStore, DirEntry, Probe};
use crate::error::{StoreError, StoreResult};

/// 内存中的文件内容.
#[derive(Debug, Clone)]
pub enum MemArtifact {
    /// 文本. 可作为 `.fcsv`, ITK 变换或元数据读取.
    Text(String),
    /// 已解析的基准点集.
    Landmarks(LandmarkSet),
    /// 标签体.
    Label(LabelVolume),
    /// 扫描体.
    Volume(ScanVolume),
    /// 变换.
    Transform(AffineTransform),
    /// 只占位, 不可读取的文件 (如 `.nrrd`).
    Opaque,
}

/// 纯内存的证据存储. 目录由文件路径的前缀隐式给出.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    files: BTreeMap<PathBuf, MemArtifact>,
}

impl MemStore {
    /// 创建空存储.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入 (或替换) 一个文件.
    pub fn insert(&mut self, path: impl Into<PathBuf>, artifact: MemArtifact) -> &mut Self {
        self.files.insert(path.into(), artifact);
        self
    }

    /// 加入一个文件并返回自身, 便于链式构造.
    pub fn with(mut self, path: impl Into<PathBuf>, artifact: MemArtifact) -> Self {
        self.insert(path, artifact);
        self
    }

    fn get(&self, path: &Path) -> StoreResult<&MemArtifact> {
        self.files.get(path).ok_or_else(|| StoreError::NotFound {
            path: path.to_owned(),
        })
    }

    fn mismatch(path: &Path, expected: &str) -> StoreError {
        StoreError::Malformed {
            path: path.to_owned(),
            reason: format!("stored artifact is not {expected}"),
        }
    }
}

impl ArtifactStore for MemStore {
    fn probe(&self, path: &Path) -> Probe {
        if self.files.contains_key(path) {
            Probe::File
        } else if self.files.keys().any(|k| k.starts_with(path)) {
            Probe::Directory
        } else {
            Probe::Absent
        }
    }

    fn list_dir(&self, dir: &Path) -> StoreResult<Vec<DirEntry>> {
        if self.probe(dir) != Probe::Directory {
            return Err(StoreError::NotFound {
                path: dir.to_owned(),
            });
        }
        let mut children = BTreeMap::new();
        for key in self.files.keys() {
            let Ok(rest) = key.strip_prefix(dir) else {
                continue;
            };
            let mut components = rest.components();
            if let Some(first) = components.next() {
                let name = first.as_os_str().to_string_lossy().into_owned();
                let is_dir = components.next().is_some();
                *children.entry(name).or_insert(false) |= is_dir;
            }
        }
        Ok(children
            .into_iter()
            .map(|(name, is_dir)| DirEntry {
                path: dir.join(&name),
                name,
                is_dir,
            })
            .collect())
    }

    fn walk_files(&self, root: &Path) -> StoreResult<Vec<PathBuf>> {
        if self.probe(root) == Probe::Absent {
            return Err(StoreError::NotFound {
                path: root.to_owned(),
            });
        }
        Ok(self
            .files
            .keys()
            .filter(|k| k.starts_with(root))
            .cloned()
            .collect())
    }

    fn read_text(&self, path: &Path) -> StoreResult<String> {
        match self.get(path)? {
            MemArtifact::Text(s) => Ok(s.clone()),
            _ => Err(Self::mismatch(path, "text")),
        }
    }

    fn load_landmark_set(&self, path: &Path) -> StoreResult<LandmarkSet> {
        match self.get(path)? {
            MemArtifact::Landmarks(set) => Ok(set.clone()),
            MemArtifact::Text(s) => LandmarkSet::parse_fcsv(s, path),
            MemArtifact::Opaque => Err(StoreError::Unsupported {
                path: path.to_owned(),
            }),
            _ => Err(Self::mismatch(path, "a fiducial list")),
        }
    }

    fn load_label_volume(&self, path: &Path) -> StoreResult<LabelVolume> {
        match self.get(path)? {
            MemArtifact::Label(v) => Ok(v.clone()),
            MemArtifact::Opaque => Err(StoreError::Unsupported {
                path: path.to_owned(),
            }),
            _ => Err(Self::mismatch(path, "a label volume")),
        }
    }

    fn load_volume(&self, path: &Path) -> StoreResult<ScanVolume> {
        match self.get(path)? {
            MemArtifact::Volume(v) => Ok(v.clone()),
            MemArtifact::Opaque => Err(StoreError::Unsupported {
                path: path.to_owned(),
            }),
            _ => Err(Self::mismatch(path, "a scan volume")),
        }
    }

    fn load_transform(&self, path: &Path) -> StoreResult<AffineTransform> {
        match self.get(path)? {
            MemArtifact::Transform(t) => Ok(t.clone()),
            MemArtifact::Text(s) => AffineTransform::parse_itk_tfm(s, path),
            MemArtifact::Opaque => Err(StoreError::Unsupported {
                path: path.to_owned(),
            }),
            _ => Err(Self::mismatch(path, "a transform")),
        }
    }
}
