//! 曲线轨迹（`.crv`）二进制解码。
//!
//! 布局（小端）：
//! - `0x00..0x08` 基准纬度（f64，度）
//! - `0x08..0x10` 基准经度（f64，度）
//! - `0x40..`     重复的 8 字节记录，每条为两个 f32 `(dx, dy)`，单位米；
//!   dy 沿屏幕坐标向下增长，因此换算纬度时取反。

use fieldconv_core::feature::Polyline;
use fieldconv_core::geometry::Point2;
use thiserror::Error;

use crate::PolylineDecoder;

pub const HEADER_LEN: usize = 0x40;
pub const RECORD_LEN: usize = 8;
/// 头部加至少一条偏移记录。
pub const MIN_LEN: usize = HEADER_LEN + RECORD_LEN;
/// 等距圆柱近似下每度子午线弧长（米）。
pub const METERS_PER_DEGREE: f64 = 111_111.0;
pub const DEFAULT_MAX_OFFSET_M: f64 = 20_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveOptions {
    /// `dx` 的绝对值必须严格小于该值，否则丢弃该记录。
    pub max_offset_m: f64,
}

impl Default for CurveOptions {
    fn default() -> Self {
        Self {
            max_offset_m: DEFAULT_MAX_OFFSET_M,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CurveError {
    #[error("curve data is {len} bytes, at least {MIN_LEN} required")]
    TooShort { len: usize },
    #[error("curve base coordinate ({latitude}, {longitude}) is not a usable position")]
    InvalidBase { latitude: f64, longitude: f64 },
    #[error("curve yields {accepted} usable point(s) out of {records} record(s), at least 2 required")]
    TooFewPoints { accepted: usize, records: usize },
}

/// 头部中的基准坐标。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveHeader {
    pub base_latitude: f64,
    pub base_longitude: f64,
}

impl CurveHeader {
    pub fn read(bytes: &[u8]) -> Result<Self, CurveError> {
        if bytes.len() < MIN_LEN {
            return Err(CurveError::TooShort { len: bytes.len() });
        }
        let header = Self {
            base_latitude: read_f64_le(bytes, 0x00),
            base_longitude: read_f64_le(bytes, 0x08),
        };
        let lat_ok = header.base_latitude.is_finite() && header.base_latitude.abs() < 90.0;
        if !lat_ok || !header.base_longitude.is_finite() {
            return Err(CurveError::InvalidBase {
                latitude: header.base_latitude,
                longitude: header.base_longitude,
            });
        }
        Ok(header)
    }
}

/// 以基准点为原点的局部切平面，只在基准点附近（几公里内）有效。
#[derive(Debug, Clone, Copy)]
struct LocalTangentPlane {
    origin: CurveHeader,
    lat_per_meter: f64,
    lon_per_meter: f64,
}

impl LocalTangentPlane {
    fn new(origin: CurveHeader) -> Self {
        Self {
            origin,
            lat_per_meter: 1.0 / METERS_PER_DEGREE,
            lon_per_meter: 1.0 / (METERS_PER_DEGREE * origin.base_latitude.to_radians().cos()),
        }
    }

    #[inline]
    fn to_geographic(&self, dx: f64, dy: f64) -> Point2 {
        Point2::from_lon_lat(
            self.origin.base_longitude + dx * self.lon_per_meter,
            self.origin.base_latitude + (-dy) * self.lat_per_meter,
        )
    }
}

/// 把 `.crv` 字节解码为经纬度折线。
///
/// 超出幅度窗口的记录被静默丢弃；末尾不足 8 字节的残片被忽略。
pub fn decode_curve(bytes: &[u8], name: &str, options: &CurveOptions) -> Result<Polyline, CurveError> {
    let header = CurveHeader::read(bytes)?;
    let plane = LocalTangentPlane::new(header);

    let records = bytes[HEADER_LEN..].chunks_exact(RECORD_LEN);
    let record_count = records.len();
    let points: Vec<Point2> = records
        .filter_map(|chunk| {
            let dx = f64::from(read_f32_le(chunk, 0));
            let dy = f64::from(read_f32_le(chunk, 4));
            let in_window = dx.abs() < options.max_offset_m;
            (in_window && dy.is_finite()).then(|| plane.to_geographic(dx, dy))
        })
        .collect();

    if points.len() < 2 {
        return Err(CurveError::TooFewPoints {
            accepted: points.len(),
            records: record_count,
        });
    }
    Ok(Polyline::new(name, points))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CurveDecoder {
    pub options: CurveOptions,
}

impl CurveDecoder {
    pub fn new(options: CurveOptions) -> Self {
        Self { options }
    }
}

impl PolylineDecoder for CurveDecoder {
    type Error = CurveError;

    fn decode(&self, bytes: &[u8], name: &str) -> Result<Polyline, CurveError> {
        decode_curve(bytes, name, &self.options)
    }
}

fn read_f64_le(bytes: &[u8], offset: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    f64::from_le_bytes(raw)
}

fn read_f32_le(bytes: &[u8], offset: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    f32::from_le_bytes(raw)
}
