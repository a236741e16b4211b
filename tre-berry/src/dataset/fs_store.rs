use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::data::{AffineTransform, LabelVolume, LandmarkSet, ScanVolume};
use crate::dataset::{ArtifactStore, DirEntry, Probe};
use crate::error::{StoreError, StoreResult};

/// 基于本地文件系统的证据存储.
///
/// 支持 `.fcsv` 基准点, `.nii` / `.nii.gz` 体数据和 ITK 文本变换 (`.tfm`, `.txt`).
/// 其它格式 (如 `.nrrd`, `.h5`) 返回 [`StoreError::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

fn io_err(path: &Path, source: io::Error) -> StoreError {
    if source.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound {
            path: path.to_owned(),
        }
    } else {
        StoreError::Io {
            path: path.to_owned(),
            source,
        }
    }
}

fn has_suffix(path: &Path, suffixes: &[&str]) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    suffixes.iter().any(|s| name.ends_with(s))
}

impl FsStore {
    fn require_file(&self, path: &Path) -> StoreResult<()> {
        match self.probe(path) {
            Probe::File => Ok(()),
            _ => Err(StoreError::NotFound {
                path: path.to_owned(),
            }),
        }
    }

    fn require_nifti(&self, path: &Path) -> StoreResult<()> {
        self.require_file(path)?;
        if has_suffix(path, &[".nii", ".nii.gz"]) {
            Ok(())
        } else {
            Err(StoreError::Unsupported {
                path: path.to_owned(),
            })
        }
    }
}

impl ArtifactStore for FsStore {
    fn probe(&self, path: &Path) -> Probe {
        match fs::metadata(path) {
            Ok(m) if m.is_dir() => Probe::Directory,
            Ok(_) => Probe::File,
            Err(_) => Probe::Absent,
        }
    }

    fn list_dir(&self, dir: &Path) -> StoreResult<Vec<DirEntry>> {
        let mut ans = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
            let entry = entry.map_err(|e| io_err(dir, e))?;
            let is_dir = entry.file_type().map_err(|e| io_err(dir, e))?.is_dir();
            ans.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                is_dir,
            });
        }
        ans.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ans)
    }

    fn walk_files(&self, root: &Path) -> StoreResult<Vec<PathBuf>> {
        if !self.exists(root) {
            return Err(StoreError::NotFound {
                path: root.to_owned(),
            });
        }
        let mut ans = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| io_err(root, e.into()))?;
            if entry.file_type().is_file() {
                ans.push(entry.into_path());
            }
        }
        Ok(ans)
    }

    fn read_text(&self, path: &Path) -> StoreResult<String> {
        fs::read_to_string(path).map_err(|e| io_err(path, e))
    }

    fn load_landmark_set(&self, path: &Path) -> StoreResult<LandmarkSet> {
        self.require_file(path)?;
        if !has_suffix(path, &[".fcsv"]) {
            return Err(StoreError::Unsupported {
                path: path.to_owned(),
            });
        }
        LandmarkSet::parse_fcsv(&self.read_text(path)?, path)
    }

    fn load_label_volume(&self, path: &Path) -> StoreResult<LabelVolume> {
        self.require_nifti(path)?;
        LabelVolume::open(path)
    }

    fn load_volume(&self, path: &Path) -> StoreResult<ScanVolume> {
        self.require_nifti(path)?;
        ScanVolume::open(path)
    }

    fn load_transform(&self, path: &Path) -> StoreResult<AffineTransform> {
        self.require_file(path)?;
        if !has_suffix(path, &[".tfm", ".txt"]) {
            return Err(StoreError::Unsupported {
                path: path.to_owned(),
            });
        }
        AffineTransform::parse_itk_tfm(&self.read_text(path)?, path)
    }
}
