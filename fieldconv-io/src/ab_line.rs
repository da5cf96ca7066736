use std::fmt;

use fieldconv_core::feature::Polyline;
use fieldconv_core::geometry::Point2;
use thiserror::Error;

use crate::PolylineDecoder;
use crate::ini::{IniDocument, IniError, IniSection};
use crate::text::decode_text;

/// AB 线的两个端点角色。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointRole {
    A,
    B,
}

impl fmt::Display for PointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointRole::A => f.write_str("A"),
            PointRole::B => f.write_str("B"),
        }
    }
}

/// 角色 → 可接受的节名，按优先级排列。
pub const POINT_SECTION_ALIASES: [(PointRole, &[&str]); 2] = [
    (PointRole::A, &["APoint", "Point1"]),
    (PointRole::B, &["BPoint", "Point2"]),
];

const LATITUDE_KEY: &str = "Latitude";
const LONGITUDE_KEY: &str = "Longitude";

#[derive(Debug, Error, PartialEq)]
pub enum AbLineError {
    #[error("text is not valid UTF-8, UTF-16 or Shift_JIS")]
    Undecodable,
    #[error("invalid INI content: {0}")]
    Syntax(#[from] IniError),
    #[error("no section for point {role} (looked for {tried})")]
    MissingSection { role: PointRole, tried: String },
    #[error("section [{section}] has no `{key}` entry")]
    MissingKey { section: String, key: &'static str },
    #[error("section [{section}] `{key}` is not a finite number: {value:?}")]
    InvalidNumber {
        section: String,
        key: &'static str,
        value: String,
    },
}

/// 解析 AB 线 `.ini`，返回 `[(lon_a, lat_a), (lon_b, lat_b)]`。坐标按原样视为 WGS84 度。
pub fn decode_ab_line(bytes: &[u8], name: &str) -> Result<Polyline, AbLineError> {
    let decoded = decode_text(bytes).ok_or(AbLineError::Undecodable)?;
    let document = IniDocument::parse(&decoded.text)?;
    let points = POINT_SECTION_ALIASES
        .iter()
        .map(|(role, aliases)| locate_point(&document, *role, aliases))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Polyline::new(name, points))
}

fn locate_point(
    document: &IniDocument,
    role: PointRole,
    aliases: &[&str],
) -> Result<Point2, AbLineError> {
    let section = aliases
        .iter()
        .find_map(|alias| document.section(alias))
        .ok_or_else(|| AbLineError::MissingSection {
            role,
            tried: aliases.join(", "),
        })?;
    let latitude = read_coordinate(section, LATITUDE_KEY)?;
    let longitude = read_coordinate(section, LONGITUDE_KEY)?;
    Ok(Point2::from_lon_lat(longitude, latitude))
}

fn read_coordinate(section: &IniSection, key: &'static str) -> Result<f64, AbLineError> {
    let raw = section.get(key).ok_or_else(|| AbLineError::MissingKey {
        section: section.name.clone(),
        key,
    })?;
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| AbLineError::InvalidNumber {
            section: section.name.clone(),
            key,
            value: raw.to_string(),
        })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AbLineDecoder;

impl PolylineDecoder for AbLineDecoder {
    type Error = AbLineError;

    fn decode(&self, bytes: &[u8], name: &str) -> Result<Polyline, AbLineError> {
        decode_ab_line(bytes, name)
    }
}
