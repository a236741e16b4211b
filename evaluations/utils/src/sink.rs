//! 报表与基准点文件的写出.

use std::fs::File;
use std::path::Path;

use tre_berry::report::Table;
use tre_berry::LandmarkSet;

/// 将表格写为 CSV. 已存在的文件会被覆盖.
pub fn write_table<P: AsRef<Path>>(table: &Table, path: P) -> csv::Result<()> {
    let mut w = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path.as_ref())?;
    for record in table.records() {
        w.write_record(&record)?;
    }
    w.flush()?;
    log::info!("{} rows written to {}", table.len(), path.as_ref().display());
    Ok(())
}

/// 仅当 `path` 不存在时写出 `.fcsv` 文件. 返回是否真的写了.
pub fn write_fcsv_if_absent<P: AsRef<Path>>(set: &LandmarkSet, path: P) -> csv::Result<bool> {
    let path = path.as_ref();
    if path.exists() {
        log::debug!("{} exists, skipped", path.display());
        return Ok(false);
    }
    set.write_fcsv(File::create(path)?)?;
    log::info!("{} fiducials written to {}", set.len(), path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tre_berry::report::Cell;
    use tre_berry::Fiducial;

    #[test]
    fn test_write_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut table = Table::new(["Case", "Preop"]).with_header_row(["", "mm"]);
        table.push(vec![Cell::from("1"), Cell::Real(0.5)]);
        table.push(vec![Cell::Blank]);
        write_table(&table, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Case,Preop\n,mm\n1,0.5\n"));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn test_write_fcsv_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("7-needle-centerline.fcsv");
        let set: LandmarkSet = [Fiducial::new("7-1", [1.0, 2.0, 3.0])].into_iter().collect();
        assert!(write_fcsv_if_absent(&set, &path).unwrap());
        assert!(!write_fcsv_if_absent(&LandmarkSet::new(), &path).unwrap());
        let back = LandmarkSet::parse_fcsv(&std::fs::read_to_string(&path).unwrap(), &path).unwrap();
        assert_eq!(back, set);
    }
}
