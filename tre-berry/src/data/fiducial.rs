//! 基准点 (fiducial) 与点集, 以及 Slicer markups fiducial (`.fcsv`) 读写.

use std::io::Write;
use std::path::Path;

use crate::error::{StoreError, StoreResult};
use crate::linalg::flip_xy;
use crate::Vec3;

/// `.fcsv` 文件的标准列.
const FCSV_COLUMNS: &str = "id,x,y,z,ow,ox,oy,oz,vis,sel,lock,label,desc,associatedNodeID";

/// 带标签的三维点 (RAS 坐标).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Fiducial {
    /// 标签, 一般以解剖位置后缀结尾, 如 `F-1`.
    pub label: String,

    /// RAS 坐标, 以毫米为单位.
    pub position: Vec3,
}

impl Fiducial {
    /// 直接初始化.
    #[inline]
    pub fn new(label: impl Into<String>, position: Vec3) -> Self {
        Self {
            label: label.into(),
            position,
        }
    }
}

/// 有序的基准点集合. 标签不保证全局唯一.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkSet {
    fiducials: Vec<Fiducial>,
}

impl FromIterator<Fiducial> for LandmarkSet {
    fn from_iter<I: IntoIterator<Item = Fiducial>>(iter: I) -> Self {
        Self {
            fiducials: iter.into_iter().collect(),
        }
    }
}

impl LandmarkSet {
    /// 创建空集合.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 点的个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.fiducials.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fiducials.is_empty()
    }

    /// 追加一个点.
    #[inline]
    pub fn push(&mut self, fiducial: Fiducial) {
        self.fiducials.push(fiducial);
    }

    /// 获取第 `index` 个点. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Fiducial> {
        self.fiducials.get(index)
    }

    /// 第一个点的坐标.
    #[inline]
    pub fn first_position(&self) -> Option<Vec3> {
        self.fiducials.first().map(|f| f.position)
    }

    /// 按顺序迭代所有点.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Fiducial> {
        self.fiducials.iter()
    }

    /// 保持标签不变, 对每个坐标施加 `op`, 返回新的点集.
    pub fn map_positions<F: FnMut(&Vec3) -> Vec3>(&self, mut op: F) -> Self {
        self.iter()
            .map(|f| Fiducial::new(f.label.clone(), op(&f.position)))
            .collect()
    }

    /// 解析 `.fcsv` 文本. `path` 仅用于错误信息.
    ///
    /// 支持 `# CoordinateSystem = 0|1|RAS|LPS` 头部, LPS 坐标会被转换为 RAS.
    /// 若存在 `# columns = ...` 头部, 则按其定位 `x`, `y`, `z` 和 `label` 列,
    /// 否则使用 Slicer 4 的默认列顺序.
    pub fn parse_fcsv(text: &str, path: &Path) -> StoreResult<Self> {
        let malformed = |reason: String| StoreError::Malformed {
            path: path.to_owned(),
            reason,
        };

        let mut lps = false;
        let mut columns: Vec<String> = FCSV_COLUMNS.split(',').map(str::to_owned).collect();
        for line in text.lines().take_while(|l| l.starts_with('#')) {
            let Some((key, value)) = line.trim_start_matches('#').split_once('=') else {
                continue;
            };
            match key.trim() {
                "CoordinateSystem" => lps = matches!(value.trim(), "1" | "LPS"),
                "columns" => columns = value.trim().split(',').map(str::to_owned).collect(),
                _ => {}
            }
        }

        let column = |name: &str| {
            columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| malformed(format!("missing column `{name}`")))
        };
        let (cx, cy, cz, cl) = (column("x")?, column("y")?, column("z")?, column("label")?);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut ans = Self::new();
        for record in reader.records() {
            let record = record.map_err(|source| StoreError::Csv {
                path: path.to_owned(),
                source,
            })?;
            let coord = |c: usize| -> StoreResult<f64> {
                let raw = record
                    .get(c)
                    .ok_or_else(|| malformed(format!("row has no column {c}")))?;
                raw.trim()
                    .parse()
                    .map_err(|_| malformed(format!("`{raw}` is not a coordinate")))
            };
            let position = [coord(cx)?, coord(cy)?, coord(cz)?];
            let label = record.get(cl).unwrap_or_default().to_owned();
            ans.push(Fiducial::new(
                label,
                if lps { flip_xy(position) } else { position },
            ));
        }
        Ok(ans)
    }

    /// 以 Slicer 4 `.fcsv` 格式 (RAS 坐标) 写入 `w`.
    pub fn write_fcsv<W: Write>(&self, mut w: W) -> csv::Result<()> {
        writeln!(w, "# Markups fiducial file version = 4.10")?;
        writeln!(w, "# CoordinateSystem = 0")?;
        writeln!(w, "# columns = {FCSV_COLUMNS}")?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(w);
        for (i, f) in self.iter().enumerate() {
            let [x, y, z] = f.position;
            writer.write_record([
                format!("vtkMRMLMarkupsFiducialNode_{i}"),
                x.to_string(),
                y.to_string(),
                z.to_string(),
                "0".into(),
                "0".into(),
                "0".into(),
                "1".into(),
                "1".into(),
                "1".into(),
                "1".into(),
                f.label.clone(),
                String::new(),
                String::new(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Markups fiducial file version = 4.6
# CoordinateSystem = 0
# columns = id,x,y,z,ow,ox,oy,oz,vis,sel,lock,label,desc,associatedNodeID
vtkMRMLMarkupsFiducialNode_0,1.5,-2,30,0,0,0,1,1,1,0,L-1,,vtkMRMLScalarVolumeNode1
vtkMRMLMarkupsFiducialNode_1,4,5,6,0,0,0,1,1,1,0,L-2,,
";

    #[test]
    fn test_parse_fcsv() {
        let set = LandmarkSet::parse_fcsv(SAMPLE, Path::new("sample.fcsv")).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(0).unwrap().label, "L-1");
        assert_eq!(set.get(0).unwrap().position, [1.5, -2.0, 30.0]);
        assert_eq!(set.get(1).unwrap().label, "L-2");
    }

    #[test]
    fn test_parse_fcsv_lps() {
        let text = "# CoordinateSystem = LPS\n# columns = label,x,y,z\nT-1,1,2,3\n";
        let set = LandmarkSet::parse_fcsv(text, Path::new("lps.fcsv")).unwrap();
        assert_eq!(set.first_position(), Some([-1.0, -2.0, 3.0]));
        assert_eq!(set.get(0).unwrap().label, "T-1");
    }

    #[test]
    fn test_parse_fcsv_bad_coordinate() {
        let text = "n0,abc,2,3,0,0,0,1,1,1,0,L-1,,\n";
        let err = LandmarkSet::parse_fcsv(text, Path::new("bad.fcsv")).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[test]
    fn test_write_then_parse() {
        let set: LandmarkSet = [
            Fiducial::new("needle-1", [-1.0, 2.5, 3.0]),
            Fiducial::new("needle-2", [0.0, 0.0, 4.0]),
        ]
        .into_iter()
        .collect();
        let mut buf = Vec::new();
        set.write_fcsv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("# Markups fiducial file version"));
        assert_eq!(
            LandmarkSet::parse_fcsv(&text, Path::new("mem.fcsv")).unwrap(),
            set
        );
    }
}
