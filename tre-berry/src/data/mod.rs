use std::ops::Index;
use std::path::Path;

use ndarray::{Array3, ArrayView2, ArrayView3, Axis};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::consts::gray::*;
use crate::error::{MetricError, StoreError, StoreResult};
use crate::Idx3d;

mod fiducial;
mod grid;
mod transform;

pub use fiducial::{Fiducial, LandmarkSet};
pub use grid::{Grid, PhysicalToIndex};
pub use transform::{AffineTransform, PointTransform};

/// 读取 nifti 文件, 并将 `[W, H, z]` 布局转换为 `(z, H, W)`.
macro_rules! read_nifti {
    ($path: expr, $elem: ty) => {{
        let path: &Path = $path;
        let nifti_err = |source| StoreError::Nifti {
            path: path.to_owned(),
            source,
        };
        let obj = ReaderOptions::new().read_file(path).map_err(nifti_err)?;
        let grid = Grid::from_nifti_header(obj.header());

        // [W, H, z] -> [z, H, W].
        let data = obj
            .into_volume()
            .into_ndarray::<$elem>()
            .map_err(nifti_err)?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        let data = Array3::<$elem>::from_shape_vec(grid.shape(), data.into_raw_vec()).map_err(
            |e| StoreError::Malformed {
                path: path.to_owned(),
                reason: e.to_string(),
            },
        )?;
        (grid, data)
    }};
}

/// 将读出的体素值转换为标签值. 非整数或超出 `u8` 范围的值视为文件内容有误.
fn to_label_values(path: &Path, raw: Array3<f64>) -> StoreResult<Array3<u8>> {
    if let Some(v) = raw
        .iter()
        .find(|v| v.fract() != 0.0 || !(0.0..=255.0).contains(*v))
    {
        return Err(StoreError::Malformed {
            path: path.to_owned(),
            reason: format!("voxel value {v} is not a label in 0..=255"),
        });
    }
    Ok(raw.mapv(|v| v as u8))
}

/// 检查体素数组形状与网格是否一致.
#[inline]
fn check_shape(grid: &Grid, shape: &[usize]) -> Result<(), MetricError> {
    let &[z, h, w] = shape else {
        unreachable!("Array3 always has three axes")
    };
    if grid.shape() == (z, h, w) {
        Ok(())
    } else {
        Err(MetricError::ShapeMismatch {
            expected: grid.shape(),
            found: (z, h, w),
        })
    }
}

/// 三维标签体 (分割结果或穿刺针掩膜). 标签值以 `u8` 保存, 数据按 `(z, h, w)` 组织.
#[derive(Debug, Clone)]
pub struct LabelVolume {
    grid: Grid,
    data: Array3<u8>,
}

impl Index<Idx3d> for LabelVolume {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl LabelVolume {
    /// 由网格和体素数据直接创建. 两者形状不一致时返回 `Err`.
    pub fn new(grid: Grid, data: Array3<u8>) -> Result<Self, MetricError> {
        check_shape(&grid, data.shape())?;
        Ok(Self { grid, data })
    }

    /// 以 `(z, h, w)` 数组和体素间距 (`(i, j, k)` 顺序) 创建轴对齐、原点为零的标签体.
    pub fn axis_aligned(data: Array3<u8>, spacing: [f64; 3]) -> Self {
        let (z, h, w) = data.dim();
        Self {
            grid: Grid::axis_aligned([w, h, z], spacing),
            data,
        }
    }

    /// 打开 nii 文件格式 (`.nii`, `.nii.gz`) 的标签体.
    ///
    /// 体素值必须是 `0..=255` 内的整数, 否则返回 [`StoreError::Malformed`].
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let (grid, raw) = read_nifti!(path, f64);
        let data = to_label_values(path, raw)?;
        Ok(Self { grid, data })
    }

    /// 体素网格.
    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, u8> {
        self.data.view()
    }

    /// 获取数据形状大小 `(z, h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取能按升序迭代水平切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = ArrayView2<'_, u8>> {
        self.data.axis_iter(Axis(0))
    }

    /// 获取标签体中前景 (非零) 体素个数.
    #[inline]
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|p| is_foreground(**p)).count()
    }

    /// 该标签体是否为全背景?
    #[inline]
    pub fn is_background(&self) -> bool {
        self.data.iter().copied().all(is_background)
    }
}

/// 三维扫描 (灰度) 体. 体素值以 `f32` 保存, 数据按 `(z, h, w)` 组织.
#[derive(Debug, Clone)]
pub struct ScanVolume {
    grid: Grid,
    data: Array3<f32>,
}

impl Index<Idx3d> for ScanVolume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl ScanVolume {
    /// 由网格和体素数据直接创建. 两者形状不一致时返回 `Err`.
    pub fn new(grid: Grid, data: Array3<f32>) -> Result<Self, MetricError> {
        check_shape(&grid, data.shape())?;
        Ok(Self { grid, data })
    }

    /// 打开 nii 文件格式 (`.nii`, `.nii.gz`) 的扫描体.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let (grid, data) = read_nifti!(path.as_ref(), f32);
        Ok(Self { grid, data })
    }

    /// 体素网格.
    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 获取数据形状大小 `(z, h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_shape_mismatch() {
        let grid = Grid::axis_aligned([3, 2, 1], [1.0; 3]);
        assert!(LabelVolume::new(grid.clone(), Array3::zeros((1, 2, 3))).is_ok());
        let err = LabelVolume::new(grid, Array3::zeros((3, 2, 1))).unwrap_err();
        assert_eq!(
            err,
            MetricError::ShapeMismatch {
                expected: (1, 2, 3),
                found: (3, 2, 1)
            }
        );
    }

    #[test]
    fn test_foreground_count() {
        let mut data = Array3::zeros((2, 3, 3));
        data[(0, 1, 1)] = 1;
        data[(1, 2, 0)] = 7;
        let label = LabelVolume::axis_aligned(data, [1.0; 3]);
        assert_eq!(label.foreground_count(), 2);
        assert!(!label.is_background());
        assert_eq!(label.slice_iter().len(), 2);
    }

    #[test]
    fn test_label_values_checked() {
        let path = Path::new("/c/label.nii");
        let mut raw = Array3::zeros((1, 2, 2));
        raw[(0, 0, 1)] = 1.0;
        raw[(0, 1, 1)] = 255.0;
        let data = to_label_values(path, raw.clone()).unwrap();
        assert_eq!(data[(0, 0, 1)], 1);
        assert_eq!(data[(0, 1, 1)], 255);

        for bad in [256.0, 300.0, -1.0, 1.5, f64::NAN] {
            raw[(0, 1, 0)] = bad;
            assert!(matches!(
                to_label_values(path, raw.clone()),
                Err(StoreError::Malformed { .. })
            ));
        }
    }
}
