//! 点变换. 目前支持以 ITK 文本格式 (`.tfm`, `.txt`) 保存的线性变换.

use std::path::Path;

use crate::data::LandmarkSet;
use crate::error::{StoreError, StoreResult};
use crate::linalg::{self, Mat3, IDENTITY};
use crate::Vec3;

/// RAS 空间中的点变换.
pub trait PointTransform {
    /// 变换单个点.
    fn transform_point(&self, point: &Vec3) -> Vec3;

    /// 变换点集中的每个点, 标签与顺序保持不变.
    fn apply(&self, set: &LandmarkSet) -> LandmarkSet {
        set.map_positions(|p| self.transform_point(p))
    }
}

/// RAS 空间中的仿射变换 `y = matrix * x + translation`.
///
/// 方向为 "moving -> fixed", 即把术前 (moving) 空间的点搬到术中 (fixed) 空间.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineTransform {
    matrix: Mat3,
    translation: Vec3,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl PointTransform for AffineTransform {
    #[inline]
    fn transform_point(&self, point: &Vec3) -> Vec3 {
        linalg::add(&linalg::mul_vec(&self.matrix, point), &self.translation)
    }
}

impl AffineTransform {
    /// 恒等变换.
    #[inline]
    pub fn identity() -> Self {
        Self::new(IDENTITY, [0.0; 3])
    }

    /// 直接初始化.
    #[inline]
    pub fn new(matrix: Mat3, translation: Vec3) -> Self {
        Self {
            matrix,
            translation,
        }
    }

    /// 纯平移.
    #[inline]
    pub fn translation(offset: Vec3) -> Self {
        Self::new(IDENTITY, offset)
    }

    /// 线性部分.
    #[inline]
    pub fn matrix(&self) -> Mat3 {
        self.matrix
    }

    /// 平移部分.
    #[inline]
    pub fn offset(&self) -> Vec3 {
        self.translation
    }

    /// 逆变换. 线性部分奇异时返回 `None`.
    pub fn inverse(&self) -> Option<Self> {
        let inv = linalg::inverse(&self.matrix)?;
        let t = linalg::mul_vec(&inv, &self.translation);
        Some(Self::new(inv, [-t[0], -t[1], -t[2]]))
    }

    /// 解析 ITK 文本变换文件. `path` 仅用于错误信息.
    ///
    /// ITK 保存的是 LPS 空间中 fixed -> moving 的重采样变换
    /// `T(x) = M (x - c) + c + t`, 这里转换为 RAS 空间并取逆.
    /// 复合变换文件只允许包含一个线性变换.
    pub fn parse_itk_tfm(text: &str, path: &Path) -> StoreResult<Self> {
        let malformed = |reason: &str| StoreError::Malformed {
            path: path.to_owned(),
            reason: reason.to_owned(),
        };
        let numbers = |value: &str| -> StoreResult<Vec<f64>> {
            value
                .split_whitespace()
                .map(|v| v.parse().map_err(|_| malformed("non-numeric parameter")))
                .collect()
        };

        let mut kind = None;
        let mut params = None;
        let mut fixed = None;
        for line in text.lines().filter(|l| !l.starts_with('#')) {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim() {
                "Transform" if value.trim().starts_with("CompositeTransform") => {}
                "Transform" if kind.is_some() => {
                    return Err(malformed("more than one transform in file"));
                }
                "Transform" => kind = Some(value.trim().to_owned()),
                "Parameters" if kind.is_some() => params = Some(numbers(value)?),
                "FixedParameters" if kind.is_some() => fixed = Some(numbers(value)?),
                _ => {}
            }
        }

        let kind = kind.ok_or_else(|| malformed("no transform found"))?;
        let params = params.ok_or_else(|| malformed("missing Parameters"))?;
        let center = match fixed.as_deref() {
            Some([x, y, z, ..]) => [*x, *y, *z],
            _ => [0.0; 3],
        };

        let (m, t) = match kind.as_str() {
            "AffineTransform_double_3_3" | "MatrixOffsetTransformBase_double_3_3"
                if params.len() == 12 =>
            {
                let m = [
                    [params[0], params[1], params[2]],
                    [params[3], params[4], params[5]],
                    [params[6], params[7], params[8]],
                ];
                (m, [params[9], params[10], params[11]])
            }
            "TranslationTransform_double_3_3" if params.len() == 3 => {
                (IDENTITY, [params[0], params[1], params[2]])
            }
            _ => return Err(StoreError::Unsupported { path: path.to_owned() }),
        };

        // LPS 中 T(x) = M x + (c + t - M c).
        let mc = linalg::mul_vec(&m, &center);
        let offset = linalg::sub(&linalg::add(&center, &t), &mc);

        // 共轭到 RAS: F T F, F = diag(-1, -1, 1).
        let mut ras = m;
        for (r, row) in ras.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                if (r < 2) != (c < 2) {
                    *cell = -*cell;
                }
            }
        }
        let resampling = Self::new(ras, linalg::flip_xy(offset));
        resampling
            .inverse()
            .ok_or_else(|| malformed("singular transform matrix"))
    }
}
