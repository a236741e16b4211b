#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 整合前列腺穿刺活检配准流程散落在各处的评估证据 (基准点, 标签体, 变换, 运行元数据),
//! 并计算配准精度指标 (TRE/LRE, Dice) 与穿刺针中心线.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 证据的文件名, 目录结构与元数据版本在不同批次的数据之间并不一致,
//!   这些约定都集中在 [`config::EngineConfig`] 与 [`dataset::discovery::PatternSet`] 中.
//! 2. 单个病例的证据缺失或自相矛盾不会中止整次评估, 该病例的对应单元格留空.
//! 3. 本 crate 不做配准, 分割或可视化.
//!
//! # 开发计划
//!
//! ### 证据模型与病例发现 ✅
//!
//! 按文件名模式把目录树中的文件归入病例, 带阶段/流程/配准类型标记.
//!
//! 实现位于 `tre-berry/src/evidence` 与 `tre-berry/src/dataset/discovery.rs`.
//!
//! ### 消歧 ✅
//!
//! 1. 配准类型回退 `bSpline -> affine -> rigid`. ✅
//! 2. 多个候选配准结果时确定被批准的那一个. ✅
//! 3. 元数据没有结果时改用病例目录的文件清单. ✅
//!
//! 实现位于 `tre-berry/src/dataset/reconcile.rs`.
//!
//! ### 基准点按标签后缀配对 ✅
//!
//! 实现位于 `tre-berry/src/matching.rs`.
//!
//! ### 误差与重叠度指标 ✅
//!
//! LRE (病例平均的平均), Dice (最近邻重采样), 标签体积, 靶向敏感度.
//!
//! 实现位于 `tre-berry/src/metrics`.
//!
//! ### 穿刺针中心线重建 ✅
//!
//! 实现位于 `tre-berry/src/needle.rs`.
//!
//! ### 报表 ✅
//!
//! 实现位于 `tre-berry/src/report.rs`.
//!
//! ### `.nrrd` 与 `.h5` 读取 ⌛️
//!
//! 目前只能读取 nifti 体数据与 ITK 文本格式的线性变换, 其余格式报告为不支持.

/// 三维索引 `(z, h, w)`, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 三维实向量 (物理坐标, 毫米).
pub type Vec3 = [f64; 3];

pub mod consts;

pub mod error;

pub mod config;

pub mod linalg;

/// 体数据, 基准点与变换.
mod data;

pub use data::{
    AffineTransform, Fiducial, Grid, LabelVolume, LandmarkSet, PhysicalToIndex, PointTransform,
    ScanVolume,
};

pub mod evidence;

pub mod dataset;

pub mod matching;

pub mod metrics;

pub mod needle;

pub mod report;

pub mod engine;

pub mod prelude;
