//! 农机导航厂商数据的解码与 Shapefile 读写。

mod ab_line;
mod boundary;
mod curve;
mod ini;
pub mod shapefile;
mod text;

use std::path::PathBuf;

use fieldconv_core::feature::Polyline;
use thiserror::Error;

pub use ab_line::{AbLineDecoder, AbLineError, POINT_SECTION_ALIASES, PointRole, decode_ab_line};
pub use boundary::{
    ALTITUDE_MODE_FIELD, BoundaryOptions, CLAMP_TO_GROUND, ID_FIELD, NAME_FIELD, RepairSummary,
    VISIBILITY_FIELD, close_rings, repair_boundary, repair_layer,
};
pub use curve::{
    CurveDecoder, CurveError, CurveHeader, CurveOptions, DEFAULT_MAX_OFFSET_M, HEADER_LEN,
    METERS_PER_DEGREE, MIN_LEN, RECORD_LEN, decode_curve,
};
pub use ini::{IniDocument, IniError, IniSection};
pub use text::{DecodedText, TextEncoding, decode_text, decode_with};

/// 写出 `.prj` 的固定内容：WGS84 地理坐标系。
pub const WGS84_PRJ: &str = "GEOGCS[\"GCS_WGS_1984\",DATUM[\"D_WGS_1984\",SPHEROID[\"WGS_1984\",6378137.0,298.257223563]],PRIMEM[\"Greenwich\",0.0],UNIT[\"Degree\",0.0174532925199433]]";

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path:?} has no .{extension} companion file")]
    MissingCompanion {
        path: PathBuf,
        extension: &'static str,
    },
    #[error("invalid shapefile {path:?}: {message}")]
    InvalidShapefile { path: PathBuf, message: String },
    #[error("shape type {code} in {path:?} is not supported here")]
    UnsupportedShapeType { path: PathBuf, code: i32 },
    #[error("attribute field `{field}`: {message}")]
    InvalidAttribute { field: String, message: String },
}

/// 字节 → 折线的厂商格式解码器。
pub trait PolylineDecoder {
    type Error: std::error::Error + Send + Sync + 'static;

    fn decode(&self, bytes: &[u8], name: &str) -> Result<Polyline, Self::Error>;
}
