use std::fs;
use std::path::{Path, PathBuf};

use fieldconv_core::feature::{AttributeValue, FieldDescriptor};
use fieldconv_core::geometry::Point2;
use fieldconv_engine::{
    ConversionOptions, FieldDisposition, Reconciler, SourceKind, convert_files,
    recover_interrupted,
};
use fieldconv_io::shapefile::{
    ShapeFeature, ShapeRecord, ShapeType, ShapefileLayer, read_shapefile, write_shapefile,
};
use fieldconv_io::{HEADER_LEN, WGS84_PRJ};

fn curve_bytes(offsets: &[(f32, f32)]) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_LEN];
    bytes[0..8].copy_from_slice(&35.0f64.to_le_bytes());
    bytes[8..16].copy_from_slice(&135.0f64.to_le_bytes());
    for (dx, dy) in offsets {
        bytes.extend_from_slice(&dx.to_le_bytes());
        bytes.extend_from_slice(&dy.to_le_bytes());
    }
    bytes
}

const AB_LINE: &str = "[APoint]\nLatitude=35.0\nLongitude=135.0\n[BPoint]\nLatitude=35.001\nLongitude=135.001\n";

fn write_boundary(dir: &Path, stem: &str) -> PathBuf {
    let ring = vec![
        Point2::new(135.0, 35.0),
        Point2::new(135.0, 35.01),
        Point2::new(135.01, 35.01),
        Point2::new(135.01, 35.0),
    ];
    let layer = ShapefileLayer {
        shape_type: ShapeType::Polygon,
        fields: vec![FieldDescriptor::character("crop", 16)],
        features: vec![ShapeFeature {
            shape: ShapeRecord::from_parts(ShapeType::Polygon, [ring.as_slice()]),
            attributes: vec![AttributeValue::Character("wheat".into())],
        }],
    };
    write_shapefile(&dir.join(stem), &layer).expect("写入边界失败")
}

fn write(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, bytes).expect("write");
}

/// 目录下所有文件名（不含子目录），排序后返回。
fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read_dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.expect("walk");
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(dir).expect("prefix").to_path_buf();
            files.push((rel, fs::read(entry.path()).expect("read")));
        }
    }
    files
}

fn leftovers(dir: &Path) -> Vec<String> {
    listing(dir)
        .into_iter()
        .filter(|name| name.contains(".fieldconv-"))
        .collect()
}

#[test]
fn field_is_replaced_by_converted_layers() {
    let root = tempfile::tempdir().expect("tempdir");
    let field = root.path().join("farm").join("field1");
    write(&field.join("Curves/track1.crv"), &curve_bytes(&[(0.0, 0.0), (10.0, -10.0)]));
    write(&field.join("ABLines/ab1.ini"), AB_LINE.as_bytes());
    fs::create_dir_all(field.join("Boundaries")).expect("mkdir");
    write_boundary(&field.join("Boundaries"), "boundary");
    write(&field.join("notes.txt"), b"stray");
    write(&field.join("Curves/readme.txt"), b"stray");

    let report = Reconciler::new(ConversionOptions::default())
        .convert_tree(root.path())
        .expect("转换失败");

    assert_eq!(report.fields.len(), 1);
    assert_eq!(report.fields[0].disposition, FieldDisposition::Replaced);
    assert_eq!(report.converted(), 3);
    assert!(report.is_clean());

    let mut expected: Vec<String> = ["ab1", "boundary", "track1"]
        .iter()
        .flat_map(|stem| ["dbf", "prj", "shp", "shx"].map(|ext| format!("{stem}.{ext}")))
        .collect();
    expected.sort();
    assert_eq!(listing(&field), expected);
    assert_eq!(fs::read_to_string(field.join("track1.prj")).expect("prj"), WGS84_PRJ);
    assert!(leftovers(&root.path().join("farm")).is_empty());

    let curve = read_shapefile(&field.join("track1.shp")).expect("读取曲线");
    assert_eq!(curve.shape_type, ShapeType::PolyLine);
    assert_eq!(curve.features[0].shape.points.len(), 2);
    let boundary = read_shapefile(&field.join("boundary.shp")).expect("读取边界");
    let points = &boundary.features[0].shape.points;
    assert_eq!(points.first(), points.last());
}

#[test]
fn non_field_directories_are_untouched() {
    let root = tempfile::tempdir().expect("tempdir");
    write(&root.path().join("docs/readme.txt"), b"hello");
    write(&root.path().join("docs/deeper/data.crv"), &curve_bytes(&[(0.0, 0.0), (1.0, 1.0)]));
    let before = snapshot(root.path());

    let report = Reconciler::new(ConversionOptions::default())
        .convert_tree(root.path())
        .expect("转换失败");

    assert!(report.fields.is_empty());
    assert_eq!(snapshot(root.path()), before);
}

#[test]
fn field_without_outputs_is_kept_unless_configured() {
    let root = tempfile::tempdir().expect("tempdir");
    let field = root.path().join("field");
    write(&field.join("Curves/broken.crv"), &[0u8; 16]);
    let before = snapshot(root.path());

    let report = Reconciler::new(ConversionOptions::default())
        .convert_tree(root.path())
        .expect("转换失败");
    assert_eq!(report.fields[0].disposition, FieldDisposition::SkippedEmpty);
    assert_eq!(report.failed(), 1);
    assert_eq!(snapshot(root.path()), before);
    assert!(leftovers(root.path()).is_empty());

    let options = ConversionOptions {
        replace_empty_fields: true,
        ..ConversionOptions::default()
    };
    let report = Reconciler::new(options)
        .convert_tree(root.path())
        .expect("转换失败");
    assert_eq!(report.fields[0].disposition, FieldDisposition::Emptied);
    assert!(field.is_dir());
    assert!(listing(&field).is_empty());
}

#[test]
fn failures_name_their_source_and_do_not_stop_the_field() {
    let root = tempfile::tempdir().expect("tempdir");
    let field = root.path().join("field");
    write(&field.join("curves-source/good.crv"), &curve_bytes(&[(0.0, 0.0), (5.0, 5.0)]));
    write(&field.join("curves-source/bad.crv"), &curve_bytes(&[(0.0, 0.0)]));
    write(&field.join("lines-source/nope.ini"), b"[APoint]\nLatitude=1\n");

    let report = Reconciler::new(ConversionOptions::default())
        .convert_tree(root.path())
        .expect("转换失败");

    assert_eq!(report.fields[0].disposition, FieldDisposition::Replaced);
    assert_eq!(report.converted(), 1);
    let failed: Vec<_> = report
        .failures()
        .map(|item| item.source.file_name().expect("name").to_string_lossy().into_owned())
        .collect();
    assert_eq!(failed, ["nope.ini", "bad.crv"]);
    assert_eq!(listing(&field), ["good.dbf", "good.prj", "good.shp", "good.shx"]);
}

#[test]
fn directory_names_are_matched_case_insensitively() {
    let root = tempfile::tempdir().expect("tempdir");
    let field = root.path().join("field");
    write(&field.join("CURVES/a.CRV"), &curve_bytes(&[(0.0, 0.0), (5.0, 5.0)]));
    write(&field.join("ablines/b.INI"), AB_LINE.as_bytes());

    let report = Reconciler::new(ConversionOptions::default())
        .convert_tree(root.path())
        .expect("转换失败");

    assert_eq!(report.converted(), 2);
    assert!(field.join("a.shp").is_file());
    assert!(field.join("b.shp").is_file());
}

#[test]
fn colliding_output_names_get_suffixes() {
    let root = tempfile::tempdir().expect("tempdir");
    let field = root.path().join("field");
    write(&field.join("ABLines/track.ini"), AB_LINE.as_bytes());
    write(&field.join("Curves/track.crv"), &curve_bytes(&[(0.0, 0.0), (5.0, 5.0)]));
    write(&field.join("Curves/nested/Track.crv"), &curve_bytes(&[(1.0, 0.0), (5.0, 5.0)]));

    let report = Reconciler::new(ConversionOptions::default())
        .convert_tree(root.path())
        .expect("转换失败");

    assert_eq!(report.converted(), 3);
    let shps: Vec<String> = listing(&field)
        .into_iter()
        .filter(|name| name.ends_with(".shp"))
        .collect();
    assert_eq!(shps, ["Track_2.shp", "track.shp", "track_3.shp"]);
}

#[test]
fn nested_fields_are_converted_deepest_first() {
    let root = tempfile::tempdir().expect("tempdir");
    let outer = root.path().join("outer");
    let inner = outer.join("plots").join("inner");
    write(&outer.join("ABLines/o.ini"), AB_LINE.as_bytes());
    write(&inner.join("ABLines/i.ini"), AB_LINE.as_bytes());

    let report = Reconciler::new(ConversionOptions::default())
        .convert_tree(root.path())
        .expect("转换失败");

    let order: Vec<&Path> = report.fields.iter().map(|f| f.path.as_path()).collect();
    assert_eq!(order.len(), 2);
    assert!(order[0].ends_with("inner"));
    assert!(order[1].ends_with("outer"));
    assert_eq!(listing(&outer), ["o.dbf", "o.prj", "o.shp", "o.shx"]);
}

#[test]
fn root_itself_can_be_a_field() {
    let parent = tempfile::tempdir().expect("tempdir");
    let field = parent.path().join("field");
    write(&field.join("ABLines/ab.ini"), AB_LINE.as_bytes());

    let report = Reconciler::new(ConversionOptions::default())
        .convert_tree(&field)
        .expect("转换失败");

    assert_eq!(report.fields.len(), 1);
    assert_eq!(listing(&field), ["ab.dbf", "ab.prj", "ab.shp", "ab.shx"]);
    assert_eq!(listing(parent.path()), ["field"]);
}

#[test]
fn interrupted_swap_is_rolled_back() {
    let root = tempfile::tempdir().expect("tempdir");
    // 中断发生在两次重命名之间：圃场已改名为备份，暂存区仍在。
    write(&root.path().join(".field.fieldconv-old/Curves/a.crv"), b"original");
    write(&root.path().join(".field.fieldconv-staging-abc123/a.shp"), b"partial");

    let recovered = recover_interrupted(root.path()).expect("恢复失败");

    assert_eq!(recovered, 2);
    assert_eq!(listing(root.path()), ["field"]);
    assert_eq!(
        fs::read(root.path().join("field/Curves/a.crv")).expect("read"),
        b"original"
    );
}

#[test]
fn completed_swap_drops_the_backup() {
    let root = tempfile::tempdir().expect("tempdir");
    write(&root.path().join("field/a.shp"), b"new");
    write(&root.path().join(".field.fieldconv-old/Curves/a.crv"), b"old");

    let recovered = recover_interrupted(root.path()).expect("恢复失败");

    assert_eq!(recovered, 1);
    assert_eq!(listing(root.path()), ["field"]);
    assert_eq!(listing(&root.path().join("field")), ["a.shp"]);
}

#[test]
fn recovery_runs_before_conversion() {
    let parent = tempfile::tempdir().expect("tempdir");
    let root = parent.path().join("tree");
    write(&root.join(".f.fieldconv-old/ABLines/ab.ini"), AB_LINE.as_bytes());

    let report = Reconciler::new(ConversionOptions::default())
        .convert_tree(&root)
        .expect("转换失败");

    assert_eq!(report.recovered, 1);
    assert_eq!(report.fields.len(), 1);
    assert_eq!(listing(&root.join("f")), ["ab.dbf", "ab.prj", "ab.shp", "ab.shx"]);
    assert!(leftovers(&root).is_empty());
}

#[test]
fn missing_root_is_an_error() {
    let parent = tempfile::tempdir().expect("tempdir");
    let result = Reconciler::new(ConversionOptions::default()).convert_tree(&parent.path().join("nope"));
    assert!(result.is_err());
}

#[test]
fn convert_files_writes_into_output_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = dir.path().join("in/a.crv");
    let b = dir.path().join("in/other/a.crv");
    write(&a, &curve_bytes(&[(0.0, 0.0), (5.0, 5.0)]));
    write(&b, &curve_bytes(&[(0.0, 0.0), (6.0, 5.0)]));
    let out = dir.path().join("out");

    let outcomes = convert_files(
        SourceKind::Curve,
        &[a, b],
        &out,
        &ConversionOptions::default(),
    )
    .expect("转换失败");

    assert!(outcomes.iter().all(|item| item.is_success()));
    assert!(out.join("a.shp").is_file());
    assert!(out.join("a_2.shp").is_file());
}

#[test]
fn report_serializes_dispositions_and_items() {
    let root = tempfile::tempdir().expect("tempdir");
    let field = root.path().join("field");
    write(&field.join("Curves/bad.crv"), &[0u8; 4]);

    let report = Reconciler::new(ConversionOptions::default())
        .convert_tree(root.path())
        .expect("转换失败");
    let json = serde_json::to_value(&report).expect("序列化失败");

    let field_json = &json["fields"][0];
    assert_eq!(field_json["disposition"]["status"], "skipped_empty");
    assert_eq!(field_json["items"][0]["kind"], "curve");
    assert!(field_json["items"][0]["error"].is_string());
    assert!(field_json["items"][0].get("output").is_none());
}

#[cfg(target_os = "linux")]
#[test]
fn non_utf8_field_is_swapped_and_restored_under_its_own_name() {
    use std::ffi::{OsStr, OsString};
    use std::os::unix::ffi::OsStrExt;

    let root = tempfile::tempdir().expect("tempdir");
    let name = OsStr::from_bytes(b"f\xFFeld");
    let field = root.path().join(name);
    write(&field.join("ABLines/ab.ini"), AB_LINE.as_bytes());

    let report = Reconciler::new(ConversionOptions::default())
        .convert_tree(root.path())
        .expect("转换失败");
    assert_eq!(report.fields[0].disposition, FieldDisposition::Replaced);
    assert_eq!(listing(&field), ["ab.dbf", "ab.prj", "ab.shp", "ab.shx"]);

    // 模拟两次重命名之间的中断：只剩备份。
    let mut backup = OsString::from(".");
    backup.push(name);
    backup.push(".fieldconv-old");
    fs::rename(&field, root.path().join(&backup)).expect("rename");

    assert_eq!(recover_interrupted(root.path()).expect("恢复失败"), 1);
    assert!(field.join("ab.shp").is_file());
    assert!(!root.path().join(&backup).exists());
}
