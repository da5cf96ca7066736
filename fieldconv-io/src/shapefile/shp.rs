//! `.shp` / `.shx` 二进制布局。头部 100 字节：文件码与长度为大端，其余为小端；
//! 长度单位均为 16 位字。

use fieldconv_core::geometry::{Bounds2D, Point2};

use super::{ShapeRecord, ShapeType};

const FILE_CODE: i32 = 9994;
const VERSION: i32 = 1000;
const HEADER_LEN: usize = 100;
const RECORD_HEADER_LEN: usize = 8;

#[derive(Debug)]
pub(super) struct DecodedShp {
    pub shape_type: ShapeType,
    pub records: Vec<ShapeRecord>,
}

struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize, context: &str) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| format!("truncated while reading {context} at byte {}", self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize, context: &str) -> Result<(), String> {
        self.take(len, context).map(|_| ())
    }

    fn i32_be(&mut self, context: &str) -> Result<i32, String> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4, context)?);
        Ok(i32::from_be_bytes(raw))
    }

    fn i32_le(&mut self, context: &str) -> Result<i32, String> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4, context)?);
        Ok(i32::from_le_bytes(raw))
    }

    fn f64_le(&mut self, context: &str) -> Result<f64, String> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8, context)?);
        Ok(f64::from_le_bytes(raw))
    }

    fn count(&mut self, context: &str) -> Result<usize, String> {
        let value = self.i32_le(context)?;
        usize::try_from(value).map_err(|_| format!("negative {context}: {value}"))
    }

    fn point(&mut self) -> Result<Point2, String> {
        let x = self.f64_le("point x")?;
        let y = self.f64_le("point y")?;
        Ok(Point2::new(x, y))
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }
}

pub(super) fn decode_shp(bytes: &[u8]) -> Result<DecodedShp, String> {
    let mut cursor = ByteCursor::new(bytes);
    let file_code = cursor.i32_be("file code")?;
    if file_code != FILE_CODE {
        return Err(format!("unexpected file code {file_code} (expected {FILE_CODE})"));
    }
    cursor.skip(20, "header padding")?;
    let _file_words = cursor.i32_be("file length")?;
    let version = cursor.i32_le("version")?;
    if version != VERSION {
        return Err(format!("unexpected version {version} (expected {VERSION})"));
    }
    let type_code = cursor.i32_le("shape type")?;
    let shape_type = ShapeType::from_code(type_code)
        .ok_or_else(|| format!("unknown shape type {type_code}"))?;
    cursor.skip(HEADER_LEN - 36, "header bounding box")?;

    let mut records = Vec::new();
    while !cursor.is_at_end() {
        let number = cursor.i32_be("record number")?;
        let content_words = cursor.i32_be("record length")?;
        let content_len = usize::try_from(content_words)
            .map_err(|_| format!("record {number}: negative content length"))?
            * 2;
        let content = cursor.take(content_len, "record content")?;
        let record = decode_record(content).map_err(|message| format!("record {number}: {message}"))?;
        records.push(record);
    }

    Ok(DecodedShp {
        shape_type,
        records,
    })
}

fn decode_record(content: &[u8]) -> Result<ShapeRecord, String> {
    let mut cursor = ByteCursor::new(content);
    let type_code = cursor.i32_le("record shape type")?;
    let shape_type = ShapeType::from_code(type_code)
        .ok_or_else(|| format!("unknown shape type {type_code}"))?;

    match shape_type {
        ShapeType::Null => Ok(ShapeRecord::null()),
        t if t.is_point() => Ok(ShapeRecord {
            shape_type,
            parts: Vec::new(),
            points: vec![cursor.point()?],
        }),
        t if t.is_multipoint() => {
            cursor.skip(32, "bounding box")?;
            let point_count = cursor.count("point count")?;
            let points = (0..point_count)
                .map(|_| cursor.point())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ShapeRecord {
                shape_type,
                parts: Vec::new(),
                points,
            })
        }
        t if t.is_polyline() || t.is_polygon() => {
            cursor.skip(32, "bounding box")?;
            let part_count = cursor.count("part count")?;
            let point_count = cursor.count("point count")?;
            let parts = (0..part_count)
                .map(|_| cursor.count("part index"))
                .collect::<Result<Vec<_>, _>>()?;
            validate_parts(&parts, point_count)?;
            let points = (0..point_count)
                .map(|_| cursor.point())
                .collect::<Result<Vec<_>, _>>()?;
            // 其后的 Z / M 数组不读取。
            Ok(ShapeRecord {
                shape_type,
                parts,
                points,
            })
        }
        other => Err(format!("shape type {} is not supported", other.code())),
    }
}

fn validate_parts(parts: &[usize], point_count: usize) -> Result<(), String> {
    if point_count > 0 && parts.first() != Some(&0) {
        return Err("first part does not start at point 0".to_string());
    }
    if parts.windows(2).any(|pair| pair[0] > pair[1]) {
        return Err("part start indices are not ascending".to_string());
    }
    if parts.iter().any(|&start| start > point_count) {
        return Err(format!("part start index beyond {point_count} points"));
    }
    Ok(())
}

fn content_len(shape: &ShapeRecord) -> usize {
    if shape.points.is_empty() {
        4
    } else {
        4 + 32 + 4 + 4 + 4 * shape.parts.len() + 16 * shape.points.len()
    }
}

fn push_i32_be(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn push_i32_le(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_f64_le(out: &mut Vec<u8>, value: f64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_header(out: &mut Vec<u8>, shape_type: ShapeType, total_len: usize, bounds: &Bounds2D) {
    push_i32_be(out, FILE_CODE);
    out.extend_from_slice(&[0u8; 20]);
    push_i32_be(out, words(total_len));
    push_i32_le(out, VERSION);
    push_i32_le(out, shape_type.code());
    for value in bounds.to_array_or_zero() {
        push_f64_le(out, value);
    }
    // Z 与 M 范围。
    out.extend_from_slice(&[0u8; 32]);
}

fn words(len: usize) -> i32 {
    i32::try_from(len / 2).unwrap_or(i32::MAX)
}

fn count(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

/// 编码 `.shp` 与 `.shx`。
pub(super) fn encode_shp(shape_type: ShapeType, shapes: &[&ShapeRecord]) -> (Vec<u8>, Vec<u8>) {
    let mut bounds = Bounds2D::empty();
    for shape in shapes {
        bounds.include_bounds(&shape.bounds());
    }

    let shp_len = HEADER_LEN
        + shapes
            .iter()
            .map(|shape| RECORD_HEADER_LEN + content_len(shape))
            .sum::<usize>();
    let shx_len = HEADER_LEN + RECORD_HEADER_LEN * shapes.len();

    let mut shp = Vec::with_capacity(shp_len);
    let mut shx = Vec::with_capacity(shx_len);
    push_header(&mut shp, shape_type, shp_len, &bounds);
    push_header(&mut shx, shape_type, shx_len, &bounds);

    for (index, shape) in shapes.iter().enumerate() {
        let offset = shp.len();
        let len = content_len(shape);
        push_i32_be(&mut shx, words(offset));
        push_i32_be(&mut shx, words(len));

        push_i32_be(&mut shp, count(index + 1));
        push_i32_be(&mut shp, words(len));
        if shape.points.is_empty() {
            push_i32_le(&mut shp, ShapeType::Null.code());
            continue;
        }
        push_i32_le(&mut shp, shape_type.code());
        for value in shape.bounds().to_array_or_zero() {
            push_f64_le(&mut shp, value);
        }
        push_i32_le(&mut shp, count(shape.parts.len()));
        push_i32_le(&mut shp, count(shape.points.len()));
        for &start in &shape.parts {
            push_i32_le(&mut shp, count(start));
        }
        for point in &shape.points {
            push_f64_le(&mut shp, point.x());
            push_f64_le(&mut shp, point.y());
        }
    }

    (shp, shx)
}
