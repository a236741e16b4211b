//! 前瞻性数据: 病例概况, 配准结果, 穿刺针中心线.

use std::fs;
use std::path::{Path, PathBuf};

use tre_berry::evidence::metadata::NeedleSeries;
use tre_berry::prelude::*;
use tre_berry::report::{self, ProspectiveRecord};
use utils::{loader, sink};

use crate::runner::RunResult;

/// 前瞻性数据的收集结果.
pub struct Collected {
    /// 成功读取元数据的病例个数.
    pub cases: usize,
    /// 新写出的中心线文件个数.
    pub centerlines: usize,
    /// 写出的表格.
    pub tables: Vec<PathBuf>,
}

/// 写出一个穿刺针序列的中心线. 目标文件已存在时不重新计算.
fn write_centerline<S: ArtifactStore>(
    engine: &Engine<S>,
    case: &CaseId,
    series: &NeedleSeries,
    case_out: &Path,
) -> RunResult<bool> {
    let Some(number) = series.series_number else {
        log::warn!("case {case}: guidance series without a series number, skipped");
        return Ok(false);
    };
    let path = case_out.join(format!("{number}-needle-centerline.fcsv"));
    if path.exists() {
        return Ok(false);
    }
    let line = match engine.needle_centerline(series) {
        Ok(line) => line,
        Err(e) => {
            log::warn!("case {case}: series {number}: {e}");
            return Ok(false);
        }
    };
    if line.is_empty() {
        log::warn!("case {case}: series {number} has an empty needle mask");
    }
    fs::create_dir_all(case_out)?;
    Ok(sink::write_fcsv_if_absent(
        &line.to_landmark_set(&number.to_string()),
        path,
    )?)
}

/// 扫描 `case_dir` 下所有病例的运行元数据, 写出概况表, 结果表与中心线.
pub fn collect(case_dir: &Path, output_dir: &Path) -> RunResult<Collected> {
    let config = EngineConfig::default()
        .with_required(vec![ArtifactKey::metadata()])
        .with_cohort(loader::cohort_from_env());
    let engine = Engine::new(FsStore, case_dir, config);

    let mut records: Vec<ProspectiveRecord> = Vec::new();
    let mut centerlines = 0;
    for case in engine.discover()? {
        let p = match engine.collect_prospective(&case) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("case {}: {e}", case.id());
                continue;
            }
        };
        let case_out = output_dir.join(case.id().as_str());
        for series in &p.needles {
            centerlines += write_centerline(&engine, case.id(), series, &case_out)? as usize;
        }
        records.push(p.record);
    }

    let general = output_dir.join("general_case_nfo.csv");
    let results = output_dir.join("results.csv");
    sink::write_table(&report::general_info_table(&records), &general)?;
    sink::write_table(&report::results_table(&records), &results)?;
    Ok(Collected {
        cases: records.len(),
        centerlines,
        tables: vec![general, results],
    })
}
