//! 程序运行函数.

use std::error::Error;
use std::fs;

use tre_berry::prelude::*;
use tre_berry::report::{self, TargetingRow, VolumeRow};
use utils::{loader, sink};

use crate::prospective;
use crate::result::CohortResult;

/// 运行中的任何致命错误.
pub type RunResult<T> = Result<T, Box<dyn Error>>;

/// 对每个病例, 按回退策略变换术前基准点与目标点, 并写出尚不存在的 `.fcsv`.
fn apply_transformations<S: ArtifactStore>(
    engine: &Engine<S>,
    cases: &[Case],
    requested: RegType,
) -> RunResult<usize> {
    let mut written = 0;
    for case in cases {
        for pipeline in [Pipeline::Manual, Pipeline::Automatic] {
            let Some(choice) = dataset::reconcile::select_transform(case, pipeline, requested) else {
                continue;
            };
            for role in [FiducialRole::Landmarks, FiducialRole::Targets] {
                match engine.apply_choice(case, role, pipeline, &choice) {
                    Ok(t) => {
                        let path = case.dir().join(t.file_name(case.id()));
                        written += sink::write_fcsv_if_absent(&t.fiducials, path)? as usize;
                    }
                    Err(e) => log::debug!("case {}: {pipeline} {role} not transformed: {e}", case.id()),
                }
            }
        }
    }
    Ok(written)
}

/// 实际运行.
pub fn run() -> RunResult<CohortResult> {
    let landmark_dir =
        loader::landmark_dir_from_env_or_home().ok_or("cannot locate the landmark directory")?;
    let output_dir =
        loader::output_dir_from_env_or_home().ok_or("cannot locate the output directory")?;
    fs::create_dir_all(&output_dir)?;
    let requested = loader::transform_type_from_env();

    let config = EngineConfig::default().with_cohort(loader::cohort_from_env());
    let dice_stages = config.dice_stages.clone();
    let engine = Engine::new(FsStore, &landmark_dir, config);

    println!("Applying {requested} transformations...");
    let transformed = apply_transformations(&engine, &engine.discover()?, requested)?;

    println!("Evaluating cases on {} cores...", utils::cpus());
    let evaluation = engine.par_evaluate()?;
    let summary = &evaluation.summary;

    // 变换后的目标点可能刚刚写出, 重新发现一次.
    let cases = engine.discover()?;
    let volumes: Vec<VolumeRow> = cases.iter().map(|c| engine.label_volumes(c)).collect();
    let targeting: Vec<TargetingRow> = cases
        .iter()
        .filter_map(|c| match engine.targeting_sensitivity(c, requested) {
            Ok(row) => Some(row),
            Err(e) => {
                log::info!("case {}: no targeting sensitivity: {e}", c.id());
                None
            }
        })
        .collect();

    let out = |name: &str| output_dir.join(name);
    let mut written = vec![
        out("LRESummary.csv"),
        out("LREOutput.csv"),
        out("DiceOutput.csv"),
        out("ProstateVolumes.csv"),
        out("TargetingSensitivity.csv"),
    ];
    let tables = [
        summary.summary_table(&dice_stages),
        summary.lre_table(),
        summary.dice_table(&dice_stages),
        report::volume_table(&volumes),
        report::targeting_table(&targeting),
    ];
    for (table, path) in tables.iter().zip(&written) {
        sink::write_table(table, path)?;
    }

    let mut result = CohortResult::new(&evaluation, transformed);
    if let Some(case_dir) = loader::case_dir_from_env_or_home().filter(|d| d.is_dir()) {
        println!("Collecting prospective data...");
        let p = prospective::collect(&case_dir, &output_dir)?;
        result.set_prospective(p.cases, p.centerlines);
        written.extend(p.tables);
    } else {
        log::info!("no prospective case directory, skipped");
    }
    result.set_written(written);
    Ok(result)
}
