//! ESRI Shapefile 读写：`.shp` + `.shx` + `.dbf`，写出时附带 `.prj`。
//!
//! 只处理二维坐标；Z/M 变体读取时丢弃高程与量测值。

mod dbf;
mod shp;

use std::ffi::OsString;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use fieldconv_core::feature::{AttributeValue, FieldDescriptor, Polyline};
use fieldconv_core::geometry::{Bounds2D, Point2};
use tracing::debug;

use crate::{IoError, WGS84_PRJ};

pub use dbf::NAME_FIELD_LENGTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
    PointZ,
    PolyLineZ,
    PolygonZ,
    MultiPointZ,
    PointM,
    PolyLineM,
    PolygonM,
    MultiPointM,
    MultiPatch,
}

impl ShapeType {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Null,
            1 => Self::Point,
            3 => Self::PolyLine,
            5 => Self::Polygon,
            8 => Self::MultiPoint,
            11 => Self::PointZ,
            13 => Self::PolyLineZ,
            15 => Self::PolygonZ,
            18 => Self::MultiPointZ,
            21 => Self::PointM,
            23 => Self::PolyLineM,
            25 => Self::PolygonM,
            28 => Self::MultiPointM,
            31 => Self::MultiPatch,
            _ => return None,
        })
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Null => 0,
            Self::Point => 1,
            Self::PolyLine => 3,
            Self::Polygon => 5,
            Self::MultiPoint => 8,
            Self::PointZ => 11,
            Self::PolyLineZ => 13,
            Self::PolygonZ => 15,
            Self::MultiPointZ => 18,
            Self::PointM => 21,
            Self::PolyLineM => 23,
            Self::PolygonM => 25,
            Self::MultiPointM => 28,
            Self::MultiPatch => 31,
        }
    }

    pub fn is_polygon(self) -> bool {
        matches!(self, Self::Polygon | Self::PolygonZ | Self::PolygonM)
    }

    pub fn is_polyline(self) -> bool {
        matches!(self, Self::PolyLine | Self::PolyLineZ | Self::PolyLineM)
    }

    fn is_point(self) -> bool {
        matches!(self, Self::Point | Self::PointZ | Self::PointM)
    }

    fn is_multipoint(self) -> bool {
        matches!(self, Self::MultiPoint | Self::MultiPointZ | Self::MultiPointM)
    }
}

/// 一条几何记录：部件起始下标表 + 点列表。
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeRecord {
    pub shape_type: ShapeType,
    pub parts: Vec<usize>,
    pub points: Vec<Point2>,
}

impl ShapeRecord {
    pub fn null() -> Self {
        Self {
            shape_type: ShapeType::Null,
            parts: Vec::new(),
            points: Vec::new(),
        }
    }

    /// 由点序列组装多部件记录；空部件被丢弃，全部为空时得到 Null 记录。
    pub fn from_parts<'a>(shape_type: ShapeType, parts: impl IntoIterator<Item = &'a [Point2]>) -> Self {
        let mut record = Self {
            shape_type,
            parts: Vec::new(),
            points: Vec::new(),
        };
        for part in parts.into_iter().filter(|part| !part.is_empty()) {
            record.parts.push(record.points.len());
            record.points.extend_from_slice(part);
        }
        if record.points.is_empty() {
            return Self::null();
        }
        record
    }

    pub fn polyline(polyline: &Polyline) -> Self {
        Self::from_parts(ShapeType::PolyLine, [polyline.points.as_slice()])
    }

    /// 每个部件在 `points` 中的范围：终点为下一部件的起点，最后一个部件到点总数为止。
    pub fn part_ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.parts.iter().enumerate().map(|(index, &start)| {
            let end = self
                .parts
                .get(index + 1)
                .copied()
                .unwrap_or(self.points.len());
            start..end
        })
    }

    pub fn bounds(&self) -> Bounds2D {
        Bounds2D::from_points(&self.points)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeFeature {
    pub shape: ShapeRecord,
    pub attributes: Vec<AttributeValue>,
}

/// 一个完整的 Shapefile 图层。
#[derive(Debug, Clone, PartialEq)]
pub struct ShapefileLayer {
    pub shape_type: ShapeType,
    /// 字段表，不含 dBASE 的删除标记。
    pub fields: Vec<FieldDescriptor>,
    pub features: Vec<ShapeFeature>,
}

impl ShapefileLayer {
    /// 单要素折线图层，属性只有 `Name`。
    pub fn from_polyline(polyline: &Polyline) -> Self {
        Self {
            shape_type: ShapeType::PolyLine,
            fields: vec![FieldDescriptor::character("Name", NAME_FIELD_LENGTH)],
            features: vec![ShapeFeature {
                shape: ShapeRecord::polyline(polyline),
                attributes: vec![AttributeValue::Character(polyline.name.clone())],
            }],
        }
    }
}

/// 在 `base` 后追加扩展名；不能用 `with_extension`，文件名本身可能含点。
pub fn sibling_path(base: &Path, extension: &str) -> PathBuf {
    let mut raw: OsString = base.as_os_str().to_owned();
    raw.push(".");
    raw.push(extension);
    PathBuf::from(raw)
}

/// 同名伴随文件，扩展名大小写不敏感。
fn companion(shp_path: &Path, extension: &str) -> Option<PathBuf> {
    let base = shp_path.with_extension("");
    let exact = sibling_path(&base, extension);
    if exact.is_file() {
        return Some(exact);
    }
    let stem = base.file_name()?;
    let dir = base
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| {
            path.file_stem() == Some(stem)
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
                && path.is_file()
        })
}

pub fn read_shapefile(shp_path: &Path) -> Result<ShapefileLayer, IoError> {
    let shp_bytes = fs::read(shp_path).map_err(|source| IoError::ReadError {
        path: shp_path.to_path_buf(),
        source,
    })?;
    let dbf_path = companion(shp_path, "dbf").ok_or_else(|| IoError::MissingCompanion {
        path: shp_path.to_path_buf(),
        extension: "dbf",
    })?;
    let dbf_bytes = fs::read(&dbf_path).map_err(|source| IoError::ReadError {
        path: dbf_path.clone(),
        source,
    })?;

    let geometry = shp::decode_shp(&shp_bytes).map_err(|message| IoError::InvalidShapefile {
        path: shp_path.to_path_buf(),
        message,
    })?;
    let table = dbf::decode_dbf(&dbf_bytes).map_err(|message| IoError::InvalidShapefile {
        path: dbf_path.clone(),
        message,
    })?;

    if geometry.records.len() != table.records.len() {
        return Err(IoError::InvalidShapefile {
            path: shp_path.to_path_buf(),
            message: format!(
                "{} shape record(s) but {} attribute record(s)",
                geometry.records.len(),
                table.records.len()
            ),
        });
    }

    let mut features = Vec::with_capacity(geometry.records.len());
    for (shape, row) in geometry.records.into_iter().zip(table.records) {
        if row.deleted {
            continue;
        }
        features.push(ShapeFeature {
            shape,
            attributes: row.values,
        });
    }
    debug!(
        path = %shp_path.display(),
        shape_type = geometry.shape_type.code(),
        features = features.len(),
        fields = table.fields.len(),
        "读取 Shapefile"
    );

    Ok(ShapefileLayer {
        shape_type: geometry.shape_type,
        fields: table.fields,
        features,
    })
}

/// 写出 `<base>.shp/.shx/.dbf/.prj`，返回 `.shp` 路径。
///
/// 先在内存中完成全部编码，写盘中途失败时删除已写出的文件。
pub fn write_shapefile(base: &Path, layer: &ShapefileLayer) -> Result<PathBuf, IoError> {
    if !matches!(
        layer.shape_type,
        ShapeType::Null | ShapeType::PolyLine | ShapeType::Polygon
    ) {
        return Err(IoError::UnsupportedShapeType {
            path: sibling_path(base, "shp"),
            code: layer.shape_type.code(),
        });
    }
    let shapes: Vec<&ShapeRecord> = layer.features.iter().map(|feature| &feature.shape).collect();
    let (shp_bytes, shx_bytes) = shp::encode_shp(layer.shape_type, &shapes);
    let rows: Vec<&[AttributeValue]> = layer
        .features
        .iter()
        .map(|feature| feature.attributes.as_slice())
        .collect();
    let dbf_bytes = dbf::encode_dbf(&layer.fields, &rows)?;

    let outputs = [
        (sibling_path(base, "shp"), shp_bytes),
        (sibling_path(base, "shx"), shx_bytes),
        (sibling_path(base, "dbf"), dbf_bytes),
        (sibling_path(base, "prj"), WGS84_PRJ.as_bytes().to_vec()),
    ];
    for (index, (path, bytes)) in outputs.iter().enumerate() {
        if let Err(source) = fs::write(path, bytes) {
            for (written, _) in &outputs[..index] {
                let _ = fs::remove_file(written);
            }
            return Err(IoError::WriteError {
                path: path.clone(),
                source,
            });
        }
    }
    Ok(outputs[0].0.clone())
}

pub fn write_polyline(base: &Path, polyline: &Polyline) -> Result<PathBuf, IoError> {
    write_shapefile(base, &ShapefileLayer::from_polyline(polyline))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_ranges_follow_start_table() {
        let record = ShapeRecord {
            shape_type: ShapeType::Polygon,
            parts: vec![0, 3],
            points: (0..5).map(|i| Point2::new(i as f64, 0.0)).collect(),
        };
        let ranges: Vec<_> = record.part_ranges().collect();
        assert_eq!(ranges, vec![0..3, 3..5]);
    }

    #[test]
    fn from_parts_skips_empty_parts() {
        let a = [Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)];
        let record = ShapeRecord::from_parts(ShapeType::PolyLine, [&a[..], &[][..], &a[..]]);
        assert_eq!(record.parts, vec![0, 2]);
        assert_eq!(record.points.len(), 4);

        let empty = ShapeRecord::from_parts(ShapeType::Polygon, [&[][..]]);
        assert_eq!(empty.shape_type, ShapeType::Null);
    }

    #[test]
    fn sibling_path_keeps_dots_in_stem() {
        let path = sibling_path(Path::new("/tmp/field.v2"), "shp");
        assert_eq!(path, PathBuf::from("/tmp/field.v2.shp"));
    }
}
