//! 数据集操作: 证据存储, 病例发现与消歧.

use std::path::{Path, PathBuf};

use crate::data::{AffineTransform, LabelVolume, LandmarkSet, ScanVolume};
use crate::error::StoreResult;

pub mod discovery;
mod fs_store;
mod mem_store;
pub mod reconcile;

pub use fs_store::FsStore;
pub use mem_store::{MemArtifact, MemStore};

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 路径探测结果.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// 普通文件.
    File,
    /// 目录.
    Directory,
    /// 不存在.
    Absent,
}

/// 目录项.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// 文件名.
    pub name: String,
    /// 完整路径.
    pub path: PathBuf,
    /// 是否为目录.
    pub is_dir: bool,
}

/// 证据存储. 病例发现和消歧逻辑只通过它访问文件, 从而可以在内存中测试.
///
/// 所有读取方法在路径不存在时返回 [`crate::error::StoreError::NotFound`].
pub trait ArtifactStore {
    /// 探测路径.
    fn probe(&self, path: &Path) -> Probe;

    /// 列出目录的直接子项, 按名称排序.
    fn list_dir(&self, dir: &Path) -> StoreResult<Vec<DirEntry>>;

    /// 递归列出目录下所有文件, 按路径排序.
    fn walk_files(&self, root: &Path) -> StoreResult<Vec<PathBuf>>;

    /// 读取文本文件.
    fn read_text(&self, path: &Path) -> StoreResult<String>;

    /// 读取基准点集.
    fn load_landmark_set(&self, path: &Path) -> StoreResult<LandmarkSet>;

    /// 读取标签体.
    fn load_label_volume(&self, path: &Path) -> StoreResult<LabelVolume>;

    /// 读取扫描体.
    fn load_volume(&self, path: &Path) -> StoreResult<ScanVolume>;

    /// 读取变换.
    fn load_transform(&self, path: &Path) -> StoreResult<AffineTransform>;

    /// 路径是否存在 (文件或目录)?
    #[inline]
    fn exists(&self, path: &Path) -> bool {
        self.probe(path) != Probe::Absent
    }
}

impl<S: ArtifactStore + ?Sized> ArtifactStore for &S {
    fn probe(&self, path: &Path) -> Probe {
        (**self).probe(path)
    }

    fn list_dir(&self, dir: &Path) -> StoreResult<Vec<DirEntry>> {
        (**self).list_dir(dir)
    }

    fn walk_files(&self, root: &Path) -> StoreResult<Vec<PathBuf>> {
        (**self).walk_files(root)
    }

    fn read_text(&self, path: &Path) -> StoreResult<String> {
        (**self).read_text(path)
    }

    fn load_landmark_set(&self, path: &Path) -> StoreResult<LandmarkSet> {
        (**self).load_landmark_set(path)
    }

    fn load_label_volume(&self, path: &Path) -> StoreResult<LabelVolume> {
        (**self).load_label_volume(path)
    }

    fn load_volume(&self, path: &Path) -> StoreResult<ScanVolume> {
        (**self).load_volume(path)
    }

    fn load_transform(&self, path: &Path) -> StoreResult<AffineTransform> {
        (**self).load_transform(path)
    }
}
