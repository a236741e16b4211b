use nifti::NiftiHeader;

use crate::linalg::{self, Mat3, IDENTITY};
use crate::{Idx3d, Vec3};

/// 体素网格: 体素索引空间与物理 (病人) 坐标空间之间的映射.
///
/// 与 ITK 保持一致, 所有向量均以 `(i, j, k)` = (列, 行, 切片) 顺序给出,
/// 物理坐标为 LPS. 注意体素数据本身按 `(z, h, w)` 即 `(k, j, i)` 顺序存储.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    size: [usize; 3],
    origin: Vec3,
    spacing: Vec3,
    direction: Mat3,
}

impl Grid {
    /// 直接构建网格. `direction` 的每一列是对应索引轴在物理空间的单位方向.
    pub fn new(size: [usize; 3], origin: Vec3, spacing: Vec3, direction: Mat3) -> Self {
        Self {
            size,
            origin,
            spacing,
            direction,
        }
    }

    /// 原点为零、方向为单位阵的网格.
    #[inline]
    pub fn axis_aligned(size: [usize; 3], spacing: Vec3) -> Self {
        Self::new(size, [0.0; 3], spacing, IDENTITY)
    }

    /// 替换原点.
    #[inline]
    pub fn with_origin(mut self, origin: Vec3) -> Self {
        self.origin = origin;
        self
    }

    /// 各轴体素个数, `(i, j, k)` 顺序.
    #[inline]
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// 体素数组形状, `(z, h, w)` 顺序.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let [i, j, k] = self.size;
        (k, j, i)
    }

    /// 原点 (索引 `(0, 0, 0)` 的物理坐标).
    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// 体素间距, 以毫米为单位.
    #[inline]
    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    /// 方向矩阵.
    #[inline]
    pub fn direction(&self) -> Mat3 {
        self.direction
    }

    /// 单个体素的体积, 以立方毫米为单位.
    #[inline]
    pub fn voxel_volume(&self) -> f64 {
        self.spacing.iter().product()
    }

    /// 间距是否都为有限正数?
    #[inline]
    pub fn has_valid_spacing(&self) -> bool {
        self.spacing.iter().all(|s| s.is_finite() && *s > 0.0)
    }

    /// 索引到物理坐标的线性部分, 即 `direction * diag(spacing)`.
    pub fn index_matrix(&self) -> Mat3 {
        let mut m = self.direction;
        for row in m.iter_mut() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell *= self.spacing[c];
            }
        }
        m
    }

    /// 将 (连续) 体素索引映射到物理坐标.
    #[inline]
    pub fn index_to_physical(&self, index: &Vec3) -> Vec3 {
        linalg::add(&self.origin, &linalg::mul_vec(&self.index_matrix(), index))
    }

    /// 获取物理坐标到连续体素索引的映射. 网格退化时返回 `None`.
    pub fn physical_to_index(&self) -> Option<PhysicalToIndex> {
        if !self.has_valid_spacing() {
            return None;
        }
        Some(PhysicalToIndex {
            inverse: linalg::inverse(&self.index_matrix())?,
            origin: self.origin,
        })
    }

    /// 从 nifti header 计算网格.
    ///
    /// 依次尝试 sform, qform, 最后退化为仅含 pixdim 的对角矩阵.
    /// nifti 的物理坐标为 RAS, 这里统一转换为 LPS.
    pub(crate) fn from_nifti_header(h: &NiftiHeader) -> Self {
        let [_, w, hh, z, ..] = h.dim;
        let size = [w as usize, hh as usize, z as usize];
        let [qfac, dx, dy, dz, ..] = h.pixdim.map(f64::from);

        let (mut m, mut offset) = if h.sform_code > 0 {
            let rows = [h.srow_x, h.srow_y, h.srow_z].map(|r| r.map(f64::from));
            (
                rows.map(|r| [r[0], r[1], r[2]]),
                [rows[0][3], rows[1][3], rows[2][3]],
            )
        } else if h.qform_code > 0 {
            let [b, c, d] = [h.quatern_b, h.quatern_c, h.quatern_d].map(f64::from);
            let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
            let rot = [
                [
                    a * a + b * b - c * c - d * d,
                    2.0 * (b * c - a * d),
                    2.0 * (b * d + a * c),
                ],
                [
                    2.0 * (b * c + a * d),
                    a * a + c * c - b * b - d * d,
                    2.0 * (c * d - a * b),
                ],
                [
                    2.0 * (b * d - a * c),
                    2.0 * (c * d + a * b),
                    a * a + d * d - c * c - b * b,
                ],
            ];
            let qfac = if qfac < 0.0 { -1.0 } else { 1.0 };
            let scale = [[dx, 0.0, 0.0], [0.0, dy, 0.0], [0.0, 0.0, qfac * dz]];
            (
                linalg::mul(&rot, &scale),
                [h.quatern_x, h.quatern_y, h.quatern_z].map(f64::from),
            )
        } else {
            ([[dx, 0.0, 0.0], [0.0, dy, 0.0], [0.0, 0.0, dz]], [0.0; 3])
        };

        // RAS -> LPS.
        for r in 0..2 {
            m[r].iter_mut().for_each(|v| *v = -*v);
            offset[r] = -offset[r];
        }

        let mut spacing = [0.0; 3];
        let mut direction = IDENTITY;
        for c in 0..3 {
            let norm = (0..3).map(|r| m[r][c].powi(2)).sum::<f64>().sqrt();
            spacing[c] = norm;
            if norm > 0.0 {
                (0..3).for_each(|r| direction[r][c] = m[r][c] / norm);
            }
        }
        Self::new(size, offset, spacing, direction)
    }
}

/// 物理坐标到连续体素索引的映射. 由 [`Grid::physical_to_index`] 创建.
#[derive(Debug, Clone)]
pub struct PhysicalToIndex {
    inverse: Mat3,
    origin: Vec3,
}

impl PhysicalToIndex {
    /// 计算 `point` 对应的连续索引 `(i, j, k)`.
    #[inline]
    pub fn eval(&self, point: &Vec3) -> Vec3 {
        linalg::mul_vec(&self.inverse, &linalg::sub(point, &self.origin))
    }
}

#[cfg(test)]
mod tests {
    use super::Grid;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_index_to_physical_scaled() {
        let g = Grid::axis_aligned([4, 4, 4], [0.5, 0.5, 3.0]).with_origin([10.0, 0.0, -5.0]);
        let p = g.index_to_physical(&[2.0, 4.0, 1.0]);
        assert!(f64_eq(p[0], 11.0));
        assert!(f64_eq(p[1], 2.0));
        assert!(f64_eq(p[2], -2.0));
        assert_eq!(g.shape(), (4, 4, 4));
    }

    #[test]
    fn test_round_trip_index() {
        let dir = [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let g = Grid::new([8, 8, 8], [1.0, 2.0, 3.0], [0.7, 0.7, 2.5], dir);
        let inv = g.physical_to_index().unwrap();
        let idx = [3.0, 5.0, 2.0];
        let back = inv.eval(&g.index_to_physical(&idx));
        for (a, b) in idx.iter().zip(back.iter()) {
            assert!(f64_eq(*a, *b));
        }
    }

    #[test]
    fn test_degenerate_grid() {
        let g = Grid::axis_aligned([2, 2, 2], [1.0, 0.0, 1.0]);
        assert!(!g.has_valid_spacing());
        assert!(g.physical_to_index().is_none());
    }
}
