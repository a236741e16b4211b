//! 评估结果.

use std::io::{self, Write};
use std::path::PathBuf;

use tre_berry::engine::{Diagnostic, Evaluation};

/// 评估程序最终结果.
pub struct CohortResult {
    cases: usize,
    qualifying: usize,
    cohort_error: Option<f64>,
    pooled_error: Option<f64>,
    transformed: usize,
    prospective: Option<(usize, usize)>,
    diagnostics: Vec<Diagnostic>,
    written: Vec<PathBuf>,
}

#[inline]
fn f64_to_display(f: Option<f64>) -> String {
    match f {
        Some(f) => format!("{f:.6}"),
        None => "/".to_string(),
    }
}

impl CohortResult {
    pub fn new(evaluation: &Evaluation, transformed: usize) -> Self {
        let s = &evaluation.summary;
        Self {
            cases: s.rows().len(),
            qualifying: s.qualifying(),
            cohort_error: s.cohort_error().ok(),
            pooled_error: s.pooled_error().ok(),
            transformed,
            prospective: None,
            diagnostics: evaluation.diagnostics.clone(),
            written: Vec::new(),
        }
    }

    pub fn set_prospective(&mut self, cases: usize, centerlines: usize) {
        self.prospective = Some((cases, centerlines));
    }

    pub fn set_written(&mut self, written: Vec<PathBuf>) {
        self.written = written;
    }

    /// 将结果写进 `w` 中.
    fn describe_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        const S4: &str = "    ";

        writeln!(w, "Cohort:")?;
        writeln!(w, "{S4}Cases evaluated: {}", self.cases)?;
        writeln!(w, "{S4}Cases in the total: {}", self.qualifying)?;
        writeln!(w, "{S4}LRE (mean of case means): {} mm", f64_to_display(self.cohort_error))?;
        writeln!(w, "{S4}LRE (pooled): {} mm", f64_to_display(self.pooled_error))?;
        writeln!(w, "{S4}Transformed fiducial files written: {}", self.transformed)?;
        if let Some((cases, centerlines)) = self.prospective {
            writeln!(w, "{S4}Prospective cases: {cases}")?;
            writeln!(w, "{S4}Needle centerlines written: {centerlines}")?;
        }
        write!(w, "{S4}Diagnostics: {}", self.diagnostics.len())?;
        for d in &self.diagnostics {
            write!(w, "\n{S4}{S4}{d}")?;
        }
        Ok(())
    }

    /// 输出运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut out = io::stdout().lock();
        if let Err(e) = self.describe_into(&mut out).and_then(|_| writeln!(out)) {
            log::error!("{e}");
        }
        drop(out);

        utils::sep();
        for path in &self.written {
            println!("{}", path.display());
        }
        utils::sep();
    }
}
