//! 评估引擎: 把病例发现, 消歧, 配对, 指标与报表串成一次完整的队列评估.
//!
//! 单个病例内的任何失败都只会让该病例的部分单元格为空, 并在诊断信息中留下一条记录;
//! 只有根目录无法读取或没有任何病例可以计入队列平均时, 整次评估才会失败.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{EngineConfig, ReferenceLandmarks};
use crate::data::{LandmarkSet, PointTransform};
use crate::dataset::reconcile::{self, ApprovedRegistration, TransformChoice};
use crate::dataset::{discovery, ArtifactStore};
use crate::error::{CaseFailure, EvalResult, ReconciliationError, StoreResult};
use crate::evidence::metadata::{MetadataDocument, NeedleSeries};
use crate::evidence::{ArtifactKey, Case, CaseId, FiducialRole, Pipeline, RegType, Stage};
use crate::matching::match_by_suffix;
use crate::metrics::{self, CaseAccuracy, LabelStatistics, NearestNeighbor};
use crate::needle::{self, Centerline};
use crate::report::{
    self, CaseMetricRow, CaseStatus, CohortSummary, ProspectiveRecord, RegionDice, TargetingRow,
    VolumeRow,
};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 一条与病例相关的诊断信息.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Diagnostic {
    /// 病例编号.
    pub case: CaseId,
    /// 说明.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "case {}: {}", self.case, self.message)
    }
}

/// 单个病例的评估结果.
#[derive(Debug, Clone)]
pub struct CaseOutcome {
    /// 报表行.
    pub row: CaseMetricRow,
    /// 诊断信息.
    pub diagnostics: Vec<Diagnostic>,
}

/// 整个队列的评估结果.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// 队列汇总.
    pub summary: CohortSummary,
    /// 所有病例的诊断信息, 按病例顺序.
    pub diagnostics: Vec<Diagnostic>,
}

/// 变换后的术前基准点.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedFiducials {
    /// 基准点用途.
    pub role: FiducialRole,
    /// 变换所属的分割流程. 使用已批准的变换时为 `None`.
    pub pipeline: Option<Pipeline>,
    /// 请求的配准类型.
    pub requested: Option<RegType>,
    /// 实际使用的配准类型. 使用未标注类型的人工变换时为 `None`.
    pub applied: Option<RegType>,
    /// 变换后的点集.
    pub fiducials: LandmarkSet,
}

impl TransformedFiducials {
    /// 输出文件名.
    ///
    /// 文件名总是使用请求的类型, 即使发生了回退, 以便下游按固定的名称查找.
    pub fn file_name(&self, case: &CaseId) -> String {
        let role = self.role;
        match (self.pipeline, self.requested) {
            (Some(p), Some(t)) => format!("{case}-Preop{role}-transformed-{t}-{p}.fcsv"),
            (Some(p), None) => format!(
                "{case}-Preop{role}-transformed_{}.fcsv",
                p.as_str().to_ascii_uppercase()
            ),
            (None, _) => format!("{case}-Preop{role}-transformed.fcsv"),
        }
    }
}

/// 单个病例的前瞻性数据.
#[derive(Debug, Clone, PartialEq)]
pub struct ProspectiveCase {
    /// 手术概况与配准结果.
    pub record: ProspectiveRecord,
    /// 已批准的穿刺针引导序列.
    pub needles: Vec<NeedleSeries>,
}

/// 评估引擎.
#[derive(Debug)]
pub struct Engine<S> {
    store: S,
    root: PathBuf,
    config: EngineConfig,
}

impl<S: ArtifactStore> Engine<S> {
    /// 以证据存储, 病例根目录和配置创建.
    pub fn new(store: S, root: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            store,
            root: root.into(),
            config,
        }
    }

    /// 证据存储.
    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// 病例根目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 发现参与评估的病例, 并计算每个病例缺失的必需证据.
    ///
    /// 不在队列中的病例和没有识别到任何文件的目录被丢弃. 无法读取的病例目录被保留,
    /// 以便在报表中标记为不完整.
    pub fn discover(&self) -> StoreResult<Vec<Case>> {
        let cases = discovery::discover(&self.store, &self.root, &self.config.patterns)?;
        let total = cases.len();
        let cases: Vec<Case> = cases
            .into_iter()
            .filter(|c| {
                let keep = self.config.cohort.accepts(c.id());
                if !keep {
                    log::info!("case {}: not in the cohort, skipped", c.id());
                }
                keep
            })
            .filter(|c| {
                let skip = c.is_empty() && c.failures().is_empty();
                if skip {
                    log::debug!("case {}: no recognized artifact, skipped", c.id());
                }
                !skip
            })
            .map(|mut c| {
                c.mark_required(&self.config.required);
                c
            })
            .collect();
        log::info!(
            "{} of {} case directories under {} selected",
            cases.len(),
            total,
            self.root.display()
        );
        Ok(cases)
    }

    fn path_of<'c>(case: &'c Case, key: &ArtifactKey) -> Result<&'c Path, CaseFailure> {
        case.path(key).ok_or(CaseFailure::Missing(*key))
    }

    fn load_fiducials(&self, case: &Case, key: &ArtifactKey) -> Result<LandmarkSet, CaseFailure> {
        Ok(self.store.load_landmark_set(Self::path_of(case, key)?)?)
    }

    /// 病例运行元数据的位置.
    pub fn metadata_path(&self, case: &Case) -> PathBuf {
        reconcile::locate_metadata(&self.store, case, self.config.metadata_root.as_deref())
    }

    /// 解析病例已批准的配准结果.
    pub fn approved_registration(
        &self,
        case: &Case,
    ) -> Result<ApprovedRegistration, ReconciliationError> {
        let metadata = self.metadata_path(case);
        reconcile::resolve_approved(&self.store, case.id(), &metadata, &self.config.series_token)
    }

    /// 用 `pipeline` 中 `requested` 类型的变换 (必要时回退) 变换术前基准点.
    pub fn transform_preop_fiducials(
        &self,
        case: &Case,
        role: FiducialRole,
        pipeline: Pipeline,
        requested: RegType,
    ) -> Result<TransformedFiducials, CaseFailure> {
        let choice = reconcile::select_transform(case, pipeline, requested)
            .ok_or(CaseFailure::Missing(ArtifactKey::transform(requested, pipeline)))?;
        self.apply_choice(case, role, pipeline, &choice)
    }

    /// 用已选定的变换变换术前基准点.
    ///
    /// 同一病例同一流程的多组基准点应共用一次 [`reconcile::select_transform`] 的结果.
    pub fn apply_choice(
        &self,
        case: &Case,
        role: FiducialRole,
        pipeline: Pipeline,
        choice: &TransformChoice,
    ) -> Result<TransformedFiducials, CaseFailure> {
        let preop = self.load_fiducials(case, &ArtifactKey::fiducials(role, Stage::Preop))?;
        let transform = self.store.load_transform(&choice.path)?;
        Ok(TransformedFiducials {
            role,
            pipeline: Some(pipeline),
            requested: Some(choice.requested),
            applied: choice.reg_type,
            fiducials: transform.apply(&preop),
        })
    }

    /// 用运行元数据中已批准的变换变换术前基准点.
    pub fn apply_approved(
        &self,
        case: &Case,
        role: FiducialRole,
    ) -> Result<TransformedFiducials, CaseFailure> {
        let preop = self.load_fiducials(case, &ArtifactKey::fiducials(role, Stage::Preop))?;
        let approved = self.approved_registration(case)?;
        log::debug!(
            "case {}: applying approved {} transform of `{}`",
            case.id(),
            approved.reg_type,
            approved.series_name
        );
        let transform = self.store.load_transform(&approved.transform)?;
        Ok(TransformedFiducials {
            role,
            pipeline: None,
            requested: None,
            applied: Some(approved.reg_type),
            fiducials: transform.apply(&preop),
        })
    }

    /// LRE 的参考点集 (变换后的术前基准点).
    pub fn reference_landmarks(&self, case: &Case) -> Result<LandmarkSet, CaseFailure> {
        match self.config.reference {
            ReferenceLandmarks::Stored(key) => self.load_fiducials(case, &key),
            ReferenceLandmarks::Transformed {
                pipeline,
                requested,
            } => self
                .transform_preop_fiducials(case, FiducialRole::Landmarks, pipeline, requested)
                .map(|t| t.fiducials),
            ReferenceLandmarks::Approved => self
                .apply_approved(case, FiducialRole::Landmarks)
                .map(|t| t.fiducials),
        }
    }

    /// 病例的配准精度: 术中基准点与变换后术前基准点按标签后缀配对.
    pub fn case_accuracy(&self, case: &Case) -> Result<CaseAccuracy, CaseFailure> {
        let intraop = self.load_fiducials(
            case,
            &ArtifactKey::fiducials(FiducialRole::Landmarks, Stage::Intraop),
        )?;
        let reference = self.reference_landmarks(case)?;
        Ok(metrics::registration_error(&match_by_suffix(
            &intraop, &reference,
        )))
    }

    /// `stage` 阶段人工分割 (参考) 与自动分割的 Dice.
    pub fn case_dice(&self, case: &Case, stage: Stage) -> Result<f64, CaseFailure> {
        let load = |pipeline| {
            let key = ArtifactKey::label(stage, pipeline);
            Self::path_of(case, &key).and_then(|p| Ok(self.store.load_label_volume(p)?))
        };
        let reference = load(Pipeline::Manual)?;
        let moving = load(Pipeline::Automatic)?;
        Ok(metrics::dice(
            &reference,
            &moving,
            &NearestNeighbor,
            self.config.label_range,
        )?)
    }

    /// 评估单个病例. 从不失败: 无法计算的指标留空并记入诊断信息.
    pub fn evaluate_case(&self, case: &Case) -> CaseOutcome {
        let id = case.id();
        let mut row = CaseMetricRow::new(id.clone());
        let mut diagnostics = Vec::new();
        let mut note = |message: String| {
            diagnostics.push(Diagnostic {
                case: id.clone(),
                message,
            })
        };

        let mut missing: Vec<String> = case
            .missing()
            .iter()
            .map(ToString::to_string)
            .chain(case.failures().iter().cloned())
            .collect();
        let mut excluded = None;

        match self.case_accuracy(case) {
            Ok(acc) => {
                if acc.unmatched > 0 {
                    log::warn!("case {id}: {} reference landmarks unmatched", acc.unmatched);
                    note(format!("{} reference landmarks unmatched", acc.unmatched));
                }
                if let Some(mean) = acc.mean {
                    log::info!("case {id}: LRE {mean:.3} mm over {} landmarks", acc.landmarks.len());
                }
                row.accuracy = Some(acc);
            }
            Err(CaseFailure::Reconciliation(e)) => {
                log::warn!("case {id}: {e}");
                excluded = Some(e.to_string());
                note(e.to_string());
            }
            Err(e) => {
                if let CaseFailure::Missing(key) = &e {
                    let key = key.to_string();
                    if !missing.contains(&key) {
                        missing.push(key);
                    }
                } else {
                    missing.push(e.to_string());
                }
                log::warn!("case {id}: landmark error unavailable: {e}");
                note(format!("landmark error unavailable: {e}"));
            }
        }

        for &stage in &self.config.dice_stages {
            let value = match self.case_dice(case, stage) {
                Ok(v) => Some(v),
                Err(e) => {
                    // 标签体本就缺失时不影响病例状态, 存在却无法使用时视为不完整.
                    if e.is_missing() {
                        log::debug!("case {id}: {stage} dice unavailable: {e}");
                    } else {
                        log::warn!("case {id}: {stage} dice unavailable: {e}");
                        missing.push(e.to_string());
                    }
                    note(format!("{stage} dice unavailable: {e}"));
                    None
                }
            };
            row.dice.push(RegionDice { stage, value });
        }

        row.status = match (excluded, missing.is_empty()) {
            (Some(reason), _) => CaseStatus::Excluded { reason },
            (None, false) => CaseStatus::Incomplete { missing },
            (None, true) => CaseStatus::Complete,
        };
        CaseOutcome { row, diagnostics }
    }

    fn fold(outcomes: Vec<CaseOutcome>) -> EvalResult<Evaluation> {
        let mut rows = Vec::with_capacity(outcomes.len());
        let mut diagnostics = Vec::new();
        for o in outcomes {
            rows.push(o.row);
            diagnostics.extend(o.diagnostics);
        }
        let summary = report::aggregate(rows);
        let error = summary.cohort_error()?;
        log::info!(
            "cohort LRE {error:.3} mm over {} of {} cases",
            summary.qualifying(),
            summary.rows().len()
        );
        Ok(Evaluation {
            summary,
            diagnostics,
        })
    }

    /// 依次评估所有病例.
    pub fn evaluate(&self) -> EvalResult<Evaluation> {
        let cases = self.discover()?;
        let outcomes = cases.iter().map(|c| self.evaluate_case(c)).collect();
        Self::fold(outcomes)
    }

    /// 各阶段, 各分割流程的标签体统计. 缺失或无法读取的组合被跳过.
    pub fn label_volumes(&self, case: &Case) -> VolumeRow {
        let mut stats = BTreeMap::new();
        for stage in [Stage::Preop, Stage::Intraop] {
            let scan = case
                .path(&ArtifactKey::volume(stage))
                .and_then(|p| self.store.load_volume(p).ok());
            for pipeline in [Pipeline::Manual, Pipeline::Automatic] {
                let Some(path) = case.path(&ArtifactKey::label(stage, pipeline)) else {
                    continue;
                };
                match self.store.load_label_volume(path) {
                    Ok(label) => {
                        let s = LabelStatistics::compute(&label, scan.as_ref(), self.config.label_range);
                        stats.insert((stage, pipeline), s);
                    }
                    Err(e) => log::warn!("case {}: {e}", case.id()),
                }
            }
        }
        VolumeRow {
            case: case.id().clone(),
            stats,
        }
    }

    /// 同一配准类型下人工与自动流程变换后目标点的偏差.
    pub fn targeting_sensitivity(
        &self,
        case: &Case,
        reg_type: RegType,
    ) -> Result<TargetingRow, CaseFailure> {
        let load = |pipeline| {
            let key = ArtifactKey::transformed(FiducialRole::Targets, Some(pipeline), Some(reg_type));
            self.load_fiducials(case, &key)
        };
        let manual = load(Pipeline::Manual)?;
        let automatic = load(Pipeline::Automatic)?;
        Ok(TargetingRow {
            case: case.id().clone(),
            deviations: metrics::targeting_sensitivity(&manual, &automatic)?,
        })
    }

    /// 读取病例运行元数据中的前瞻性信息.
    pub fn collect_prospective(&self, case: &Case) -> Result<ProspectiveCase, CaseFailure> {
        let path = self.metadata_path(case);
        if !self.store.exists(&path) {
            return Err(ReconciliationError::MetadataMissing { path }.into());
        }
        let doc = MetadataDocument::parse(&self.store.read_text(&path)?, &path)?;
        let base = path.parent().unwrap_or(Path::new(""));
        Ok(ProspectiveCase {
            record: ProspectiveRecord {
                case: case.id().clone(),
                info: doc.case_info(),
                results: doc.results(base),
            },
            needles: doc.needle_series(base),
        })
    }

    /// 重建穿刺针引导序列的中心线.
    pub fn needle_centerline(&self, series: &NeedleSeries) -> Result<Centerline, CaseFailure> {
        let path = series.label.as_deref().ok_or(CaseFailure::Missing(
            ArtifactKey::label(Stage::Intraop, Pipeline::Automatic),
        ))?;
        let mask = self.store.load_label_volume(path)?;
        Ok(needle::centerline(&mask))
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl<S: ArtifactStore + Sync> Engine<S> {
    /// 借助 `rayon` 并行评估所有病例, 之后再单线程地汇总.
    pub fn par_evaluate(&self) -> EvalResult<Evaluation> {
        let cases = self.discover()?;
        let outcomes = cases.par_iter().map(|c| self.evaluate_case(c)).collect();
        Self::fold(outcomes)
    }
}
