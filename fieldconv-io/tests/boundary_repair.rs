use std::fs;
use std::path::Path;

use fieldconv_core::feature::{AttributeValue, FieldDescriptor, FieldKind};
use fieldconv_core::geometry::Point2;
use fieldconv_io::shapefile::{
    ShapeFeature, ShapeRecord, ShapeType, ShapefileLayer, read_shapefile, sibling_path,
    write_shapefile,
};
use fieldconv_io::{BoundaryOptions, CLAMP_TO_GROUND, IoError, WGS84_PRJ, repair_boundary};

fn square(open: bool) -> Vec<Point2> {
    let mut points = vec![
        Point2::new(135.0, 35.0),
        Point2::new(135.0, 35.01),
        Point2::new(135.01, 35.01),
        Point2::new(135.01, 35.0),
    ];
    if !open {
        points.push(points[0]);
    }
    points
}

fn hole() -> Vec<Point2> {
    vec![
        Point2::new(135.004, 35.004),
        Point2::new(135.006, 35.004),
        Point2::new(135.006, 35.006),
    ]
}

fn source_layer(fields: Vec<FieldDescriptor>, features: Vec<(ShapeRecord, Vec<AttributeValue>)>) -> ShapefileLayer {
    ShapefileLayer {
        shape_type: ShapeType::Polygon,
        fields,
        features: features
            .into_iter()
            .map(|(shape, attributes)| ShapeFeature { shape, attributes })
            .collect(),
    }
}

fn write_source(dir: &Path, stem: &str, layer: &ShapefileLayer) -> std::path::PathBuf {
    write_shapefile(&dir.join(stem), layer).expect("写入源 Shapefile 失败")
}

#[test]
fn open_rings_are_closed_and_order_is_kept() {
    let dir = tempfile::tempdir().expect("tempdir");
    let outer = square(true);
    let inner = hole();
    let shape = ShapeRecord::from_parts(ShapeType::Polygon, [outer.as_slice(), inner.as_slice()]);
    let source = write_source(
        dir.path(),
        "field_a",
        &source_layer(
            vec![FieldDescriptor::character("crop", 16)],
            vec![(shape, vec![AttributeValue::Character("rice".into())])],
        ),
    );

    let out_base = dir.path().join("out").join("field_a");
    fs::create_dir_all(out_base.parent().expect("parent")).expect("mkdir");
    let summary = repair_boundary(&source, &out_base, "field_a", &BoundaryOptions::default())
        .expect("修复失败");
    assert_eq!(summary.features, 1);
    assert_eq!(summary.closed_rings, 2);

    let repaired = read_shapefile(&summary.output).expect("读取修复结果");
    assert_eq!(repaired.shape_type, ShapeType::Polygon);
    let record = &repaired.features[0].shape;
    let parts: Vec<&[Point2]> = record.part_ranges().map(|r| &record.points[r]).collect();
    assert_eq!(parts.len(), 2);
    for (part, original) in parts.iter().zip([&outer, &inner]) {
        assert_eq!(part.len(), original.len() + 1);
        assert_eq!(&part[..original.len()], original.as_slice());
        assert_eq!(part.first(), part.last());
    }

    let names: Vec<&str> = repaired.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["crop", "id", "Name"]);
    assert_eq!(
        repaired.features[0].attributes,
        vec![
            AttributeValue::Character("rice".into()),
            AttributeValue::Numeric(Some(1.0)),
            AttributeValue::Character("field_a".into()),
        ]
    );
    let prj = fs::read_to_string(sibling_path(&out_base, "prj")).expect("prj");
    assert_eq!(prj, WGS84_PRJ);
    assert!(sibling_path(&out_base, "shx").is_file());
}

#[test]
fn closed_polygon_is_unchanged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let closed = square(false);
    let shape = ShapeRecord::from_parts(ShapeType::Polygon, [closed.as_slice()]);
    let source = write_source(
        dir.path(),
        "closed",
        &source_layer(vec![], vec![(shape.clone(), vec![])]),
    );

    let out_base = dir.path().join("closed_fixed");
    let summary =
        repair_boundary(&source, &out_base, "closed", &BoundaryOptions::default()).expect("修复");
    assert_eq!(summary.closed_rings, 0);
    let repaired = read_shapefile(&summary.output).expect("读取");
    assert_eq!(repaired.features[0].shape, shape);
}

#[test]
fn display_hints_fill_existing_fields_and_ids_are_sequential() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fields = vec![
        FieldDescriptor::character("ID", 8),
        FieldDescriptor::numeric("visibility", 4, 0),
        FieldDescriptor::character("altitudeMo", 20),
    ];
    let row = vec![
        AttributeValue::Character("old".into()),
        AttributeValue::Numeric(Some(0.0)),
        AttributeValue::Character(String::new()),
    ];
    let shape = ShapeRecord::from_parts(ShapeType::Polygon, [square(true).as_slice()]);
    let source = write_source(
        dir.path(),
        "hints",
        &source_layer(
            fields,
            vec![
                (shape.clone(), row.clone()),
                (ShapeRecord::null(), row.clone()),
                (shape, row),
            ],
        ),
    );

    let out_base = dir.path().join("hints_out");
    repair_boundary(&source, &out_base, "hints", &BoundaryOptions::default()).expect("修复");
    let repaired = read_shapefile(&sibling_path(&out_base, "shp")).expect("读取");
    assert_eq!(repaired.fields.len(), 4, "ID 已存在，仅追加 Name");
    assert_eq!(repaired.features.len(), 3);
    assert_eq!(repaired.features[1].shape.shape_type, ShapeType::Null);
    for (index, feature) in repaired.features.iter().enumerate() {
        assert_eq!(
            feature.attributes[0],
            AttributeValue::Character((index + 1).to_string())
        );
        assert_eq!(feature.attributes[1], AttributeValue::Numeric(Some(1.0)));
        assert_eq!(
            feature.attributes[2],
            AttributeValue::Character(CLAMP_TO_GROUND.into())
        );
    }

    let no_hints = dir.path().join("no_hints");
    repair_boundary(
        &source,
        &no_hints,
        "hints",
        &BoundaryOptions {
            display_hints: false,
        },
    )
    .expect("修复");
    let plain = read_shapefile(&sibling_path(&no_hints, "shp")).expect("读取");
    assert_eq!(plain.features[0].attributes[1], AttributeValue::Numeric(Some(0.0)));
    assert_eq!(plain.fields[3].kind, FieldKind::Character);
}

#[test]
fn polyline_source_keeps_its_family_and_gets_closed_parts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let line = vec![
        Point2::new(135.0, 35.0),
        Point2::new(135.0, 35.01),
        Point2::new(135.01, 35.01),
    ];
    let layer = ShapefileLayer {
        shape_type: ShapeType::PolyLine,
        fields: vec![],
        features: vec![ShapeFeature {
            shape: ShapeRecord::from_parts(ShapeType::PolyLine, [line.as_slice()]),
            attributes: vec![],
        }],
    };
    let source = write_source(dir.path(), "line", &layer);

    let summary = repair_boundary(&source, &dir.path().join("x"), "line", &BoundaryOptions::default())
        .expect("折线边界应被修复");
    assert_eq!(summary.closed_rings, 1);

    let repaired = read_shapefile(&summary.output).expect("读取修复结果");
    assert_eq!(repaired.shape_type, ShapeType::PolyLine);
    let points = &repaired.features[0].shape.points;
    assert_eq!(points.len(), line.len() + 1);
    assert_eq!(&points[..line.len()], line.as_slice());
    assert_eq!(points.first(), points.last());
}

#[test]
fn null_source_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layer = ShapefileLayer {
        shape_type: ShapeType::Null,
        fields: vec![],
        features: vec![ShapeFeature {
            shape: ShapeRecord::null(),
            attributes: vec![],
        }],
    };
    let source = write_source(dir.path(), "empty", &layer);
    let err = repair_boundary(&source, &dir.path().join("x"), "empty", &BoundaryOptions::default())
        .expect_err("无几何类型不是边界");
    assert!(matches!(err, IoError::UnsupportedShapeType { code: 0, .. }));
    assert!(!dir.path().join("x.shp").exists());
}

#[test]
fn oversized_dbf_record_count_fails_this_boundary_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shape = ShapeRecord::from_parts(ShapeType::Polygon, [square(true).as_slice()]);
    let source = write_source(dir.path(), "huge", &source_layer(vec![], vec![(shape, vec![])]));
    let dbf = dir.path().join("huge.dbf");
    let mut bytes = fs::read(&dbf).expect("read dbf");
    bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    fs::write(&dbf, &bytes).expect("write dbf");

    let err = repair_boundary(&source, &dir.path().join("w"), "huge", &BoundaryOptions::default())
        .expect_err("记录数超出文件大小");
    assert!(matches!(err, IoError::InvalidShapefile { .. }));
    assert!(!dir.path().join("w.shp").exists());
}

#[test]
fn missing_dbf_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shape = ShapeRecord::from_parts(ShapeType::Polygon, [square(false).as_slice()]);
    let source = write_source(dir.path(), "nodbf", &source_layer(vec![], vec![(shape, vec![])]));
    fs::remove_file(dir.path().join("nodbf.dbf")).expect("rm dbf");

    let err = repair_boundary(&source, &dir.path().join("y"), "nodbf", &BoundaryOptions::default())
        .expect_err("缺少 dbf");
    assert!(matches!(err, IoError::MissingCompanion { extension: "dbf", .. }));
}

#[test]
fn truncated_shp_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shape = ShapeRecord::from_parts(ShapeType::Polygon, [square(true).as_slice()]);
    let source = write_source(dir.path(), "cut", &source_layer(vec![], vec![(shape, vec![])]));
    let bytes = fs::read(&source).expect("read");
    fs::write(&source, &bytes[..bytes.len() - 10]).expect("truncate");

    let err = repair_boundary(&source, &dir.path().join("z"), "cut", &BoundaryOptions::default())
        .expect_err("截断");
    assert!(matches!(err, IoError::InvalidShapefile { .. }));
}
