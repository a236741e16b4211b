//! 报表: 把每个病例的指标折叠成固定布局的表格.
//!
//! 本模块只做纯计算, 不做任何 I/O. 表格以 [`Table`] 给出, 写出 CSV 由调用方负责.
//! 缺失的值总是输出为空单元格, 而不是 0.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::EmptyCohortError;
use crate::evidence::metadata::{CaseInfo, RegistrationResult, Segmentation};
use crate::evidence::{CaseId, Pipeline, Stage};
use crate::metrics::{self, CaseAccuracy, LabelStatistics, TargetDeviation};
use crate::Vec3;

/// 表格单元格.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Cell {
    /// 空.
    Blank,
    /// 文本.
    Text(String),
    /// 实数.
    Real(f64),
    /// 计数.
    Count(usize),
    /// 布尔值.
    Flag(bool),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blank => Ok(()),
            Self::Text(s) => f.write_str(s),
            Self::Real(v) => write!(f, "{v}"),
            Self::Count(n) => write!(f, "{n}"),
            Self::Flag(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Option<f64>> for Cell {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Self::Blank, Self::Real)
    }
}

impl From<Option<&str>> for Cell {
    fn from(v: Option<&str>) -> Self {
        v.map_or(Self::Blank, Cell::from)
    }
}

/// `n` 个空单元格.
#[inline]
fn blanks(n: usize) -> impl Iterator<Item = Cell> {
    std::iter::repeat(Cell::Blank).take(n)
}

/// 以 `[x, y, z]` 形式输出坐标.
fn position_text([x, y, z]: Vec3) -> Cell {
    Cell::Text(format!("[{x}, {y}, {z}]"))
}

/// 表头 (可能有多行) 与数据行. 各行长度可以不同.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Table {
    header: Vec<Vec<String>>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// 以单行表头创建空表.
    pub fn new<S: Into<String>, I: IntoIterator<Item = S>>(header: I) -> Self {
        Self {
            header: vec![header.into_iter().map(Into::into).collect()],
            rows: Vec::new(),
        }
    }

    /// 追加一行表头.
    pub fn with_header_row<S: Into<String>, I: IntoIterator<Item = S>>(mut self, row: I) -> Self {
        self.header.push(row.into_iter().map(Into::into).collect());
        self
    }

    /// 追加数据行.
    #[inline]
    pub fn push(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    /// 表头.
    #[inline]
    pub fn header(&self) -> &[Vec<String>] {
        &self.header
    }

    /// 数据行.
    #[inline]
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// 数据行个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 是否没有数据行?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 按输出顺序 (先表头后数据) 迭代文本化的记录.
    pub fn records(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.header.iter().cloned().chain(
            self.rows
                .iter()
                .map(|row| row.iter().map(ToString::to_string).collect()),
        )
    }
}

/// 病例状态.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum CaseStatus {
    /// 所有必需证据都存在且可用.
    Complete,
    /// 缺少部分必需证据, 或证据存在却无法读取, 但仍尽量给出了结果.
    Incomplete {
        /// 缺失或无法使用的证据的描述.
        missing: Vec<String>,
    },
    /// 无法消歧等原因导致病例被排除在队列统计之外.
    Excluded {
        /// 排除原因.
        reason: String,
    },
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Incomplete { missing } => write!(f, "missing: {}", missing.join(" ")),
            Self::Excluded { reason } => write!(f, "excluded: {reason}"),
        }
    }
}

/// 某阶段的 Dice.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct RegionDice {
    /// 阶段.
    pub stage: Stage,
    /// Dice. 无法计算时为 `None`.
    pub value: Option<f64>,
}

/// 单个病例的指标, 每个病例恰好产生一行.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct CaseMetricRow {
    /// 病例编号.
    pub case: CaseId,
    /// 配准精度.
    pub accuracy: Option<CaseAccuracy>,
    /// 各阶段的 Dice.
    pub dice: Vec<RegionDice>,
    /// 状态.
    pub status: CaseStatus,
}

impl CaseMetricRow {
    /// 创建一个尚无任何指标的完整病例行.
    pub fn new(case: CaseId) -> Self {
        Self {
            case,
            accuracy: None,
            dice: Vec::new(),
            status: CaseStatus::Complete,
        }
    }

    /// 病例平均误差.
    #[inline]
    pub fn mean_error(&self) -> Option<f64> {
        self.accuracy.as_ref().and_then(|a| a.mean)
    }

    /// 指定阶段的 Dice.
    pub fn dice(&self, stage: Stage) -> Option<f64> {
        self.dice
            .iter()
            .find(|d| d.stage == stage)
            .and_then(|d| d.value)
    }

    /// 是否计入队列平均? 需有病例平均误差且未被排除.
    #[inline]
    pub fn qualifies(&self) -> bool {
        !matches!(self.status, CaseStatus::Excluded { .. }) && self.mean_error().is_some()
    }
}

/// 队列汇总.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct CohortSummary {
    rows: Vec<CaseMetricRow>,
    cohort_error: Option<f64>,
    pooled_error: Option<f64>,
}

/// 把病例行折叠为队列汇总. 行的顺序保持不变.
pub fn aggregate(rows: Vec<CaseMetricRow>) -> CohortSummary {
    let qualifying = || rows.iter().filter(|r| r.qualifies());
    let cohort_error = metrics::cohort_mean(qualifying().filter_map(CaseMetricRow::mean_error)).ok();
    let pooled_error = metrics::pooled_mean(qualifying().filter_map(|r| r.accuracy.as_ref())).ok();
    CohortSummary {
        rows,
        cohort_error,
        pooled_error,
    }
}

impl CohortSummary {
    /// 所有病例行.
    #[inline]
    pub fn rows(&self) -> &[CaseMetricRow] {
        &self.rows
    }

    /// 计入队列平均的病例个数.
    pub fn qualifying(&self) -> usize {
        self.rows.iter().filter(|r| r.qualifies()).count()
    }

    /// 队列误差: 各病例平均误差的平均.
    #[inline]
    pub fn cohort_error(&self) -> Result<f64, EmptyCohortError> {
        self.cohort_error.ok_or(EmptyCohortError)
    }

    /// 所有已配对点的合并平均误差.
    #[inline]
    pub fn pooled_error(&self) -> Result<f64, EmptyCohortError> {
        self.pooled_error.ok_or(EmptyCohortError)
    }

    /// 指定阶段 Dice 的平均. 没有任何病例有该值时为 `None`.
    pub fn dice_mean(&self, stage: Stage) -> Option<f64> {
        metrics::cohort_mean(self.rows.iter().filter_map(|r| r.dice(stage))).ok()
    }

    /// 汇总表: 每个病例一行, 最后一行为队列平均.
    pub fn summary_table(&self, dice_stages: &[Stage]) -> Table {
        let mut header = vec![
            "Case".to_owned(),
            "Landmarks".to_owned(),
            "Unmatched".to_owned(),
            "LRE-Case".to_owned(),
            "LRE-Max".to_owned(),
        ];
        header.extend(dice_stages.iter().map(|s| format!("Dice-{s}")));
        header.push("Status".to_owned());

        let mut table = Table::new(header);
        for r in &self.rows {
            let acc = r.accuracy.as_ref();
            let mut row = vec![
                Cell::from(r.case.as_str()),
                acc.map_or(Cell::Blank, |a| Cell::Count(a.landmarks.len())),
                acc.map_or(Cell::Blank, |a| Cell::Count(a.unmatched)),
                r.mean_error().into(),
                acc.and_then(CaseAccuracy::max).into(),
            ];
            row.extend(dice_stages.iter().map(|s| r.dice(*s).into()));
            row.push(Cell::Text(r.status.to_string()));
            table.push(row);
        }

        let mut total = vec![
            Cell::from("Total"),
            Cell::Blank,
            Cell::Blank,
            self.cohort_error.into(),
            Cell::Blank,
        ];
        total.extend(dice_stages.iter().map(|s| self.dice_mean(*s).into()));
        total.push(Cell::Text(format!(
            "{} of {} cases",
            self.qualifying(),
            self.rows.len()
        )));
        table.push(total);
        table
    }

    /// 逐点误差明细表.
    ///
    /// 每个病例: 病例编号行, 每个已配对点一行, 病例平均一行, 空行. 最后一行为队列平均.
    pub fn lre_table(&self) -> Table {
        let mut table = Table::new([
            "Case",
            "Label",
            "Intraop x-pos",
            "Intraop y-pos",
            "Intraop z-pos",
            "PreopTransformed Label",
            "PreopTransformed x-pos",
            "PreopTransformed y-pos",
            "PreopTransformed z-pos",
            " ",
            "LRE-Fiducial",
            "LRE-Case",
            "LRE-Total",
        ]);
        for r in &self.rows {
            table.push(vec![Cell::from(r.case.as_str())]);
            if let Some(acc) = &r.accuracy {
                for e in &acc.landmarks {
                    let mut row = vec![Cell::Blank, Cell::from(e.source.label.as_str())];
                    row.extend(e.source.position.map(Cell::Real));
                    row.push(Cell::from(e.target.label.as_str()));
                    row.extend(e.target.position.map(Cell::Real));
                    row.push(Cell::Blank);
                    row.push(Cell::Real(e.distance));
                    table.push(row);
                }
            }
            let mut mean = blanks(11).collect::<Vec<_>>();
            mean.push(r.mean_error().into());
            table.push(mean);
            table.push(vec![Cell::Blank]);
        }
        let mut total = blanks(12).collect::<Vec<_>>();
        total.push(self.cohort_error.into());
        table.push(total);
        table
    }

    /// Dice 表, 每个病例一行.
    pub fn dice_table(&self, stages: &[Stage]) -> Table {
        let mut header = vec!["Case".to_owned()];
        header.extend(stages.iter().map(ToString::to_string));
        let mut table = Table::new(header);
        for r in &self.rows {
            let mut row = vec![Cell::from(r.case.as_str())];
            row.extend(stages.iter().map(|s| r.dice(*s).into()));
            table.push(row);
        }
        table
    }
}

/// 单个病例各阶段, 各分割流程的标签体统计.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct VolumeRow {
    /// 病例编号.
    pub case: CaseId,
    /// 统计结果. 缺失的组合输出为空.
    pub stats: BTreeMap<(Stage, Pipeline), LabelStatistics>,
}

/// 体积表的列顺序.
const VOLUME_COLUMNS: [(Stage, Pipeline); 4] = [
    (Stage::Preop, Pipeline::Manual),
    (Stage::Preop, Pipeline::Automatic),
    (Stage::Intraop, Pipeline::Manual),
    (Stage::Intraop, Pipeline::Automatic),
];

/// 标签体积表. 两行表头: 分割组合, 单位.
pub fn volume_table(rows: &[VolumeRow]) -> Table {
    let mut header = vec!["Case".to_owned()];
    let mut units = vec![String::new()];
    for (stage, pipeline) in VOLUME_COLUMNS {
        header.push(format!("{pipeline} {stage}"));
        header.push(String::new());
        units.push("Volume mm^3".to_owned());
        units.push("Volume cc".to_owned());
    }
    let mut table = Table::new(header).with_header_row(units);
    for r in rows {
        let mut row = vec![Cell::from(r.case.as_str())];
        for key in VOLUME_COLUMNS {
            let s = r.stats.get(&key);
            row.push(s.map(|s| s.volume_mm3).into());
            row.push(s.map(|s| s.volume_cc).into());
        }
        table.push(row);
    }
    table
}

/// 单个病例的靶向敏感度.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct TargetingRow {
    /// 病例编号.
    pub case: CaseId,
    /// 逐个目标点的偏差.
    pub deviations: Vec<TargetDeviation>,
}

/// 靶向敏感度表, 每个目标点一行.
pub fn targeting_table(rows: &[TargetingRow]) -> Table {
    let mut table = Table::new([
        "Case",
        "Transformed_Target_Manual",
        "Manual_Pos",
        "Transformed_Target_Automatic",
        "Automatic_Pos",
        "Target_Sensitivity",
    ]);
    for r in rows {
        for d in &r.deviations {
            table.push(vec![
                Cell::from(r.case.as_str()),
                Cell::from(d.manual.label.as_str()),
                position_text(d.manual.position),
                Cell::from(d.automatic.label.as_str()),
                position_text(d.automatic.position),
                Cell::Real(d.distance),
            ]);
        }
    }
    table
}

/// 单个病例的前瞻性记录: 手术概况与所有配准结果.
#[derive(Debug, Clone, PartialEq)]
pub struct ProspectiveRecord {
    /// 病例编号.
    pub case: CaseId,
    /// 手术概况. 旧版元数据没有.
    pub info: Option<CaseInfo>,
    /// 配准结果, 按元数据中的顺序.
    pub results: Vec<RegistrationResult>,
}

/// 分割记录的六列: 算法, 开始, 结束, 是否修改, 修改开始, 修改结束.
fn segmentation_cells(seg: Option<&Segmentation>) -> Vec<Cell> {
    let Some(seg) = seg else {
        return blanks(6).collect();
    };
    let modified = seg.user_modified.as_ref();
    vec![
        seg.algorithm.as_deref().into(),
        seg.start_time.as_deref().into(),
        seg.end_time.as_deref().into(),
        Cell::Flag(modified.is_some()),
        modified.and_then(|m| m.start_time.as_deref()).into(),
        modified.and_then(|m| m.end_time.as_deref()).into(),
    ]
}

const SEGMENTATION_HEADER: [&str; 6] = [
    "Segmentation_Algorithm",
    "Segmentation_Started_Time",
    "Segmentation_Completed_Time",
    "User_modified",
    "Modification_Started_Time",
    "Modification_Completed_Time",
];

/// 病例概况表. 没有概况的病例不输出.
pub fn general_info_table(records: &[ProspectiveRecord]) -> Table {
    let mut table = Table::new(
        ["Case", "Start_Time", "Completed_Time", "Preop_used", "ERC"]
            .into_iter()
            .chain(SEGMENTATION_HEADER),
    );
    for r in records {
        let Some(info) = &r.info else {
            continue;
        };
        let mut row = vec![
            Cell::from(r.case.as_str()),
            info.started.as_deref().into(),
            info.completed.as_deref().into(),
            Cell::Flag(info.preop_used),
            info.used_erc.map_or(Cell::Blank, Cell::Flag),
        ];
        row.extend(segmentation_cells(info.preop_segmentation.as_ref()));
        table.push(row);
    }
    table
}

/// 配准结果表, 每个结果一行.
pub fn results_table(records: &[ProspectiveRecord]) -> Table {
    let mut table = Table::new(
        [
            "Case",
            "Series_Number",
            "Series_Description",
            "Series_Type",
            "Time(Received)",
            "Status",
            "Time",
            "Consent_given",
            "Registration_Type",
        ]
        .into_iter()
        .chain(SEGMENTATION_HEADER),
    );
    for rec in records {
        for r in &rec.results {
            let number = r
                .series_number
                .map_or_else(|| r.name.clone(), |n| n.to_string());
            let mut row = vec![
                Cell::from(rec.case.as_str()),
                Cell::Text(number),
                Cell::from(r.description.as_str()),
                r.series_type.as_deref().into(),
                r.received_time.as_deref().into(),
                Cell::from(r.status.as_str()),
                r.status_time.as_deref().into(),
                r.consent_given_by.as_deref().into(),
                r.approved_type.map(|t| t.as_str()).into(),
            ];
            row.extend(segmentation_cells(r.segmentation.as_ref()));
            table.push(row);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Fiducial, LandmarkSet};
    use crate::matching::match_by_suffix;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn accuracy(errors: &[f64]) -> CaseAccuracy {
        let intraop: LandmarkSet = (0..errors.len())
            .map(|i| Fiducial::new(format!("I-{i}"), [0.0; 3]))
            .collect();
        let preop: LandmarkSet = errors
            .iter()
            .enumerate()
            .map(|(i, e)| Fiducial::new(format!("P-{i}"), [*e, 0.0, 0.0]))
            .collect();
        metrics::registration_error(&match_by_suffix(&intraop, &preop))
    }

    fn row(id: &str, errors: Option<&[f64]>) -> CaseMetricRow {
        let mut r = CaseMetricRow::new(CaseId::from(id));
        r.accuracy = errors.map(accuracy);
        r
    }

    #[test]
    fn test_aggregate_mean_of_means() {
        let mut missing = row("3", None);
        missing.status = CaseStatus::Incomplete {
            missing: vec!["IntraopLandmarks".to_owned()],
        };
        let summary = aggregate(vec![row("1", Some(&[4.0])), row("2", Some(&[0.0, 0.0, 0.0])), missing]);

        assert_eq!(summary.rows().len(), 3);
        assert_eq!(summary.qualifying(), 2);
        assert!(f64_eq(summary.cohort_error().unwrap(), 2.0));
        assert!(f64_eq(summary.pooled_error().unwrap(), 1.0));

        let table = summary.summary_table(&[]);
        assert_eq!(table.len(), 4);
        // 缺失的误差为空单元格.
        assert_eq!(table.rows()[2][3], Cell::Blank);
        assert_eq!(table.rows()[2][5].to_string(), "missing: IntraopLandmarks");
        assert_eq!(table.rows()[3][3], Cell::Real(2.0));
    }

    #[test]
    fn test_excluded_rows_do_not_count() {
        let mut excluded = row("9", Some(&[100.0]));
        excluded.status = CaseStatus::Excluded {
            reason: "unresolved".to_owned(),
        };
        let summary = aggregate(vec![row("1", Some(&[1.0])), excluded]);
        assert!(f64_eq(summary.cohort_error().unwrap(), 1.0));
    }

    #[test]
    fn test_empty_cohort() {
        let summary = aggregate(vec![row("1", None)]);
        assert_eq!(summary.cohort_error(), Err(EmptyCohortError));
        let table = summary.summary_table(&[Stage::Preop]);
        assert_eq!(table.rows()[1][3], Cell::Blank);
        assert_eq!(table.rows()[1][5], Cell::Blank);
    }

    #[test]
    fn test_lre_table_layout() {
        let summary = aggregate(vec![row("5", Some(&[3.0, 1.0]))]);
        let table = summary.lre_table();
        // 病例行, 2 个点, 病例平均, 空行, 总计.
        assert_eq!(table.len(), 6);
        assert_eq!(table.header()[0].len(), 13);
        assert_eq!(table.rows()[1].len(), 11);
        assert_eq!(table.rows()[1][1], Cell::from("I-0"));
        assert_eq!(table.rows()[1][10], Cell::Real(3.0));
        assert_eq!(table.rows()[3][11], Cell::Real(2.0));
        assert_eq!(table.rows()[5][12], Cell::Real(2.0));

        let records: Vec<_> = table.records().collect();
        assert_eq!(records[1], vec!["5".to_owned()]);
    }

    #[test]
    fn test_dice_table() {
        let mut r = row("7", None);
        r.dice = vec![RegionDice {
            stage: Stage::Intraop,
            value: Some(0.8),
        }];
        let summary = aggregate(vec![r]);
        let table = summary.dice_table(&[Stage::Preop, Stage::Intraop]);
        assert_eq!(table.header()[0], vec!["Case", "Preop", "Intraop"]);
        assert_eq!(table.rows()[0], vec![Cell::from("7"), Cell::Blank, Cell::Real(0.8)]);
        assert_eq!(summary.dice_mean(Stage::Intraop), Some(0.8));
        assert_eq!(summary.dice_mean(Stage::Preop), None);
    }

    #[test]
    fn test_volume_table() {
        let mut stats = BTreeMap::new();
        stats.insert(
            (Stage::Intraop, Pipeline::Automatic),
            LabelStatistics {
                count: 10,
                volume_mm3: 2500.0,
                volume_cc: 2.5,
                mean_intensity: None,
                min_intensity: None,
                max_intensity: None,
            },
        );
        let table = volume_table(&[VolumeRow {
            case: CaseId::from("1"),
            stats,
        }]);
        assert_eq!(table.header().len(), 2);
        assert_eq!(table.header()[0][1], "Manual Preop");
        assert_eq!(table.header()[1][8], "Volume cc");
        let r = &table.rows()[0];
        assert_eq!(r.len(), 9);
        assert_eq!(r[1], Cell::Blank);
        assert_eq!(r[7], Cell::Real(2500.0));
        assert_eq!(r[8], Cell::Real(2.5));
    }

    #[test]
    fn test_targeting_table() {
        let manual: LandmarkSet = [Fiducial::new("T-1", [0.0, 0.0, 0.0])].into_iter().collect();
        let automatic: LandmarkSet = [Fiducial::new("T-1", [0.0, 3.0, 4.0])].into_iter().collect();
        let deviations = metrics::targeting_sensitivity(&manual, &automatic).unwrap();
        let table = targeting_table(&[TargetingRow {
            case: CaseId::from("2"),
            deviations,
        }]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0][4].to_string(), "[0, 3, 4]");
        assert_eq!(table.rows()[0][5], Cell::Real(5.0));
    }

    #[test]
    fn test_segmentation_cells() {
        assert_eq!(segmentation_cells(None), vec![Cell::Blank; 6]);
        let seg = Segmentation {
            algorithm: Some("DeepInfer".to_owned()),
            start_time: Some("t0".to_owned()),
            end_time: None,
            user_modified: None,
        };
        let cells = segmentation_cells(Some(&seg));
        assert_eq!(cells[0], Cell::from("DeepInfer"));
        assert_eq!(cells[2], Cell::Blank);
        assert_eq!(cells[3], Cell::Flag(false));
    }
}
