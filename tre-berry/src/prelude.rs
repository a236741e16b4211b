//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Vec3};

pub use crate::data::{
    AffineTransform, Fiducial, Grid, LabelVolume, LandmarkSet, PointTransform, ScanVolume,
};

pub use crate::config::{CohortFilter, EngineConfig, ReferenceLandmarks};
pub use crate::engine::{Engine, Evaluation, TransformedFiducials};
pub use crate::error::{CaseFailure, EvalError, EvalResult, StoreError};
pub use crate::evidence::{ArtifactKey, Case, CaseId, FiducialRole, Pipeline, RegType, Stage};

pub use crate::dataset::home_dataset_dir_with;
pub use crate::dataset::{self, ArtifactStore, FsStore, MemStore};

pub use crate::matching::match_by_suffix;
pub use crate::metrics::{cohort_mean, dice, registration_error, LabelRange, NearestNeighbor};
pub use crate::needle::centerline;
pub use crate::report::{aggregate, Table};
