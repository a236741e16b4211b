//! 三维小型线性代数工具.
//!
//! 本 crate 只需要 3x3 矩阵与三维向量的少量运算, 不值得为此引入 BLAS 后端.

use crate::Vec3;

/// 行优先存储的 3x3 矩阵.
pub type Mat3 = [[f64; 3]; 3];

/// 单位矩阵.
pub const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// 行列式绝对值小于该值的矩阵视为奇异.
const SINGULAR_EPS: f64 = 1e-12;

/// 两点间的三维欧氏距离.
#[inline]
pub fn distance(a: &Vec3, b: &Vec3) -> f64 {
    sub(a, b).iter().map(|d| d * d).sum::<f64>().sqrt()
}

/// `a - b`.
#[inline]
pub fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// `a + b`.
#[inline]
pub fn add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// 矩阵乘向量 `m * v`.
#[inline]
pub fn mul_vec(m: &Mat3, v: &Vec3) -> Vec3 {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// 矩阵乘法 `a * b`.
pub fn mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut ans = [[0.0; 3]; 3];
    for (r, row) in ans.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[r][k] * b[k][c]).sum();
        }
    }
    ans
}

/// 行列式.
#[inline]
pub fn det(m: &Mat3) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// 求逆矩阵. 矩阵奇异或含非有限值时返回 `None`.
pub fn inverse(m: &Mat3) -> Option<Mat3> {
    let d = det(m);
    if !d.is_finite() || d.abs() < SINGULAR_EPS {
        return None;
    }
    let inv = 1.0 / d;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv,
        ],
    ])
}

/// LPS <-> RAS 坐标系互转: 翻转前两个轴的符号.
#[inline]
pub fn flip_xy([x, y, z]: Vec3) -> Vec3 {
    [-x, -y, z]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_distance() {
        assert!(f64_eq(distance(&[0.0, 0.0, 0.0], &[3.0, 4.0, 0.0]), 5.0));
        assert!(f64_eq(distance(&[1.0, 1.0, 1.0], &[1.0, 1.0, 1.0]), 0.0));
    }

    #[test]
    fn test_inverse_round_trip() {
        let m = [[2.0, 0.0, 1.0], [0.0, 3.0, 0.0], [1.0, 0.0, 1.0]];
        let inv = inverse(&m).unwrap();
        let id = mul(&m, &inv);
        for (r, row) in id.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                assert!(f64_eq(*v, IDENTITY[r][c]));
            }
        }
    }

    #[test]
    fn test_singular() {
        let m = [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]];
        assert!(inverse(&m).is_none());
    }
}
