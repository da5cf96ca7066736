//! 边界多边形修复：闭合环、补齐属性字段、附带 WGS84 `.prj`。

use std::path::{Path, PathBuf};

use fieldconv_core::feature::{AttributeValue, BoundaryFeature, FieldDescriptor, FieldKind, Ring};
use tracing::{debug, info};

use crate::IoError;
use crate::shapefile::{
    NAME_FIELD_LENGTH, ShapeFeature, ShapeRecord, ShapeType, ShapefileLayer, read_shapefile,
    write_shapefile,
};

pub const ID_FIELD: &str = "id";
pub const NAME_FIELD: &str = "Name";
pub const VISIBILITY_FIELD: &str = "visibility";
pub const ALTITUDE_MODE_FIELD: &str = "altitudeMo";
pub const CLAMP_TO_GROUND: &str = "clampToGround";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryOptions {
    /// 源字段表已有 `visibility` / `altitudeMo` 时写入显示提示。
    pub display_hints: bool,
}

impl Default for BoundaryOptions {
    fn default() -> Self {
        Self {
            display_hints: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairSummary {
    /// 写出的 `.shp` 路径。
    pub output: PathBuf,
    pub features: usize,
    /// 追加了闭合点的环数量。
    pub closed_rings: usize,
}

/// 按部件起始下标表拆分点列表，并闭合每个首尾不一致的环。空部件被丢弃。
pub fn close_rings(record: &ShapeRecord) -> (Vec<Ring>, usize) {
    let mut closed = 0;
    let rings = record
        .part_ranges()
        .filter_map(|range| {
            let points = record.points.get(range)?.to_vec();
            if points.is_empty() {
                return None;
            }
            let mut ring = Ring::new(points);
            if ring.close() {
                closed += 1;
            }
            Some(ring)
        })
        .collect();
    (rings, closed)
}

fn find_field(fields: &[FieldDescriptor], name: &str) -> Option<usize> {
    fields
        .iter()
        .position(|field| field.name.eq_ignore_ascii_case(name))
}

fn ensure_field(fields: &mut Vec<FieldDescriptor>, descriptor: FieldDescriptor) -> usize {
    find_field(fields, &descriptor.name).unwrap_or_else(|| {
        fields.push(descriptor);
        fields.len() - 1
    })
}

fn number_for(kind: FieldKind, number: f64) -> Option<AttributeValue> {
    match kind {
        FieldKind::Numeric | FieldKind::Float => Some(AttributeValue::Numeric(Some(number))),
        FieldKind::Character => Some(AttributeValue::Character(format!("{number}"))),
        FieldKind::Logical => Some(AttributeValue::Logical(Some(number != 0.0))),
        FieldKind::Date => None,
    }
}

fn text_for(kind: FieldKind, text: &str) -> Option<AttributeValue> {
    match kind {
        FieldKind::Character => Some(AttributeValue::Character(text.to_string())),
        _ => None,
    }
}

fn assign(
    values: &mut [AttributeValue],
    fields: &[FieldDescriptor],
    index: usize,
    value: impl FnOnce(FieldKind) -> Option<AttributeValue>,
) {
    let field = &fields[index];
    match value(field.kind) {
        Some(value) => values[index] = value,
        None => debug!(field = %field.name, "字段类型不匹配，保留原值"),
    }
}

/// 修复后图层的几何类型：多边形族写为 Polygon，折线族写为 PolyLine（均为二维）。
fn output_shape_type(source: ShapeType) -> Option<ShapeType> {
    if source.is_polygon() {
        Some(ShapeType::Polygon)
    } else if source.is_polyline() {
        Some(ShapeType::PolyLine)
    } else {
        None
    }
}

/// 纯变换：源图层 → 修复后的二维图层，同时返回闭合的部件数。
/// 多边形与折线的每个部件都会被闭合；其他几何类型不处理。
pub fn repair_layer(
    source: &ShapefileLayer,
    name: &str,
    options: &BoundaryOptions,
) -> Option<(ShapefileLayer, usize)> {
    let shape_type = output_shape_type(source.shape_type)?;
    let mut fields = source.fields.clone();
    let id_index = ensure_field(&mut fields, FieldDescriptor::numeric(ID_FIELD, 10, 0));
    let name_index = ensure_field(
        &mut fields,
        FieldDescriptor::character(NAME_FIELD, NAME_FIELD_LENGTH),
    );
    let visibility_index = find_field(&fields, VISIBILITY_FIELD).filter(|_| options.display_hints);
    let altitude_index = find_field(&fields, ALTITUDE_MODE_FIELD).filter(|_| options.display_hints);

    let mut closed_total = 0;
    let mut features = Vec::with_capacity(source.features.len());
    for (index, feature) in source.features.iter().enumerate() {
        let (rings, closed) = close_rings(&feature.shape);
        closed_total += closed;

        let mut attributes: Vec<AttributeValue> = fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                feature
                    .attributes
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| AttributeValue::empty_for(field.kind))
            })
            .collect();
        let sequence = (index + 1) as f64;
        assign(&mut attributes, &fields, id_index, |kind| number_for(kind, sequence));
        assign(&mut attributes, &fields, name_index, |kind| text_for(kind, name));
        if let Some(i) = visibility_index {
            assign(&mut attributes, &fields, i, |kind| number_for(kind, 1.0));
        }
        if let Some(i) = altitude_index {
            assign(&mut attributes, &fields, i, |kind| text_for(kind, CLAMP_TO_GROUND));
        }

        let boundary = BoundaryFeature { rings, attributes };
        features.push(ShapeFeature {
            shape: ShapeRecord::from_parts(
                shape_type,
                boundary.rings.iter().map(|ring| ring.points.as_slice()),
            ),
            attributes: boundary.attributes,
        });
    }

    let layer = ShapefileLayer {
        shape_type,
        fields,
        features,
    };
    Some((layer, closed_total))
}

/// 读取 `source`，修复后写出到 `output_base`（不含扩展名）。
pub fn repair_boundary(
    source: &Path,
    output_base: &Path,
    name: &str,
    options: &BoundaryOptions,
) -> Result<RepairSummary, IoError> {
    let layer = read_shapefile(source)?;
    let (repaired, closed_rings) =
        repair_layer(&layer, name, options).ok_or_else(|| IoError::UnsupportedShapeType {
            path: source.to_path_buf(),
            code: layer.shape_type.code(),
        })?;
    let output = write_shapefile(output_base, &repaired)?;
    info!(
        source = %source.display(),
        output = %output.display(),
        features = repaired.features.len(),
        closed_rings,
        "边界修复完成"
    );
    Ok(RepairSummary {
        output,
        features: repaired.features.len(),
        closed_rings,
    })
}
