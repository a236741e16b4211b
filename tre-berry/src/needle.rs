//! 穿刺针中心线重建.
//!
//! 对穿刺针掩膜的每个含前景的水平切片求二维包围盒, 以包围盒中点作为该切片上的针位置,
//! 按切片升序得到一条近似的三维轨迹.
//!
//! 同一切片上若有多个互不相连的前景区域, 它们会被同一个包围盒覆盖, 只产生一个点.

use itertools::{Itertools, MinMaxResult};
use ndarray::ArrayView2;

use crate::consts::gray::is_foreground;
use crate::data::{Fiducial, LabelVolume, LandmarkSet};
use crate::linalg;
use crate::Vec3;

/// ITK 顺序的体素索引 `[列, 行, 切片]`.
pub type ItkIndex = [usize; 3];

/// 重建出的中心线.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Centerline {
    /// 体素索引, 按切片升序.
    pub points_ijk: Vec<ItkIndex>,
    /// 对应的 RAS 物理坐标.
    pub points_ras: Vec<Vec3>,
}

impl Centerline {
    /// 点个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.points_ijk.len()
    }

    /// 是否为空 (掩膜全为背景)?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points_ijk.is_empty()
    }

    /// 转换为基准点集, 标签为 `{prefix}-{序号}`, 序号从 1 开始.
    pub fn to_landmark_set(&self, prefix: &str) -> LandmarkSet {
        self.points_ras
            .iter()
            .enumerate()
            .map(|(i, p)| Fiducial::new(format!("{prefix}-{}", i + 1), *p))
            .collect()
    }
}

/// `[lo + (hi - lo) / 2]`, 整数截断.
#[inline]
fn midpoint(r: MinMaxResult<usize>) -> Option<usize> {
    match r {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(v) => Some(v),
        MinMaxResult::MinMax(lo, hi) => Some(lo + (hi - lo) / 2),
    }
}

/// 切片前景包围盒的中点, `(列, 行)`. 切片全为背景时返回 `None`.
fn slice_midpoint(slice: ArrayView2<'_, u8>) -> Option<(usize, usize)> {
    let fg = slice
        .indexed_iter()
        .filter(|(_, p)| is_foreground(**p))
        .map(|(hw, _)| hw)
        .collect_vec();
    let row = midpoint(fg.iter().map(|(h, _)| *h).minmax())?;
    let col = midpoint(fg.iter().map(|(_, w)| *w).minmax())?;
    Some((col, row))
}

/// 计算每个含前景切片上的针位置 (ITK 索引), 按切片升序.
pub fn needle_points_ijk(mask: &LabelVolume) -> Vec<ItkIndex> {
    mask.slice_iter()
        .enumerate()
        .filter_map(|(k, slice)| slice_midpoint(slice).map(|(i, j)| [i, j, k]))
        .collect()
}

/// 重建中心线: 体素索引经网格映射到 LPS 物理坐标, 再翻转前两个轴得到 RAS.
pub fn centerline(mask: &LabelVolume) -> Centerline {
    let points_ijk = needle_points_ijk(mask);
    let grid = mask.grid();
    let points_ras = points_ijk
        .iter()
        .map(|idx| {
            let lps = grid.index_to_physical(&idx.map(|v| v as f64));
            linalg::flip_xy(lps)
        })
        .collect();
    log::debug!("needle centerline with {} points", points_ijk.len());
    Centerline {
        points_ijk,
        points_ras,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Grid;
    use crate::linalg::IDENTITY;
    use ndarray::Array3;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_three_slices() {
        let mut data = Array3::zeros((8, 10, 10));
        for z in 3..=5 {
            data[(z, 2, 4)] = 1;
            data[(z, 5, 7)] = 1;
        }
        let mask = LabelVolume::axis_aligned(data, [1.0; 3]);
        let pts = needle_points_ijk(&mask);
        // 行: 2 + (5 - 2) / 2 = 3; 列: 4 + (7 - 4) / 2 = 5.
        assert_eq!(pts, vec![[5, 3, 3], [5, 3, 4], [5, 3, 5]]);
    }

    #[test]
    fn test_all_background() {
        let mask = LabelVolume::axis_aligned(Array3::zeros((4, 4, 4)), [1.0; 3]);
        let line = centerline(&mask);
        assert!(line.is_empty());
        assert!(line.to_landmark_set("N").is_empty());
    }

    #[test]
    fn test_physical_points_are_ras() {
        let mut data = Array3::zeros((3, 4, 4));
        data[(1, 2, 1)] = 1;
        let grid = Grid::new([4, 4, 3], [10.0, 20.0, 30.0], [0.5, 0.5, 2.0], IDENTITY);
        let mask = LabelVolume::new(grid, data).unwrap();
        let line = centerline(&mask);
        assert_eq!(line.points_ijk, vec![[1, 2, 1]]);
        let [x, y, z] = line.points_ras[0];
        assert!(f64_eq(x, -10.5));
        assert!(f64_eq(y, -21.0));
        assert!(f64_eq(z, 32.0));

        let set = line.to_landmark_set("12");
        assert_eq!(set.get(0).map(|f| f.label.as_str()), Some("12-1"));
    }
}
