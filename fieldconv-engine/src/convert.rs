use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use fieldconv_config::ConversionConfig;
use fieldconv_io::shapefile::write_polyline;
use fieldconv_io::{
    AbLineDecoder, AbLineError, BoundaryOptions, CurveDecoder, CurveError, CurveOptions, IoError,
    PolylineDecoder, repair_boundary,
};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::{info, warn};

use crate::errors::EngineError;
use crate::field::SourceKind;

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOptions {
    pub curve: CurveOptions,
    pub boundary: BoundaryOptions,
    pub line_prefix: String,
    pub curve_prefix: String,
    pub boundary_prefix: String,
    pub replace_empty_fields: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self::from(&ConversionConfig::default())
    }
}

impl From<&ConversionConfig> for ConversionOptions {
    fn from(config: &ConversionConfig) -> Self {
        Self {
            curve: CurveOptions {
                max_offset_m: config.max_curve_offset_m,
            },
            boundary: BoundaryOptions {
                display_hints: config.display_hints,
            },
            line_prefix: config.line_prefix.clone(),
            curve_prefix: config.curve_prefix.clone(),
            boundary_prefix: config.boundary_prefix.clone(),
            replace_empty_fields: config.replace_empty_fields,
        }
    }
}

impl ConversionOptions {
    pub fn prefix(&self, kind: SourceKind) -> &str {
        match kind {
            SourceKind::Line => &self.line_prefix,
            SourceKind::Boundary => &self.boundary_prefix,
            SourceKind::Curve => &self.curve_prefix,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Curve(#[from] CurveError),
    #[error(transparent)]
    AbLine(#[from] AbLineError),
    #[error(transparent)]
    Io(#[from] IoError),
}

/// 单个源文件的转换结果：成功时为写出的 `.shp` 路径。
#[derive(Debug)]
pub struct ItemOutcome {
    pub kind: SourceKind,
    pub source: PathBuf,
    pub result: Result<PathBuf, ConvertError>,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// 面向用户的一行描述。
    pub fn describe(&self) -> String {
        match &self.result {
            Ok(output) => format!(
                "{} {} -> {}",
                self.kind.label(),
                self.source.display(),
                output.display()
            ),
            Err(err) => format!("{} {}: {err}", self.kind.label(), self.source.display()),
        }
    }
}

impl Serialize for ItemOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Record<'a> {
            kind: SourceKind,
            source: &'a Path,
            #[serde(skip_serializing_if = "Option::is_none")]
            output: Option<&'a Path>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<String>,
        }

        Record {
            kind: self.kind,
            source: &self.source,
            output: self.result.as_ref().ok().map(PathBuf::as_path),
            error: self.result.as_ref().err().map(ToString::to_string),
        }
        .serialize(serializer)
    }
}

/// 为同一输出目录分配不重复的文件名（忽略大小写），冲突时追加 `_2`、`_3`……
#[derive(Debug, Default)]
pub struct OutputNamer {
    used: HashSet<String>,
}

impl OutputNamer {
    pub fn propose(&self, prefix: &str, stem: &str) -> String {
        let base = format!("{prefix}{stem}");
        if !self.used.contains(&base.to_lowercase()) {
            return base;
        }
        (2..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.used.contains(&candidate.to_lowercase()))
            .unwrap_or(base)
    }

    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_lowercase());
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn decode_and_write<D>(decoder: &D, source: &Path, stem: &str, base: &Path) -> Result<PathBuf, ConvertError>
where
    D: PolylineDecoder,
    ConvertError: From<D::Error>,
{
    let bytes = fs::read(source).map_err(|err| ConvertError::Read {
        path: source.to_path_buf(),
        source: err,
    })?;
    let polyline = decoder.decode(&bytes, stem)?;
    Ok(write_polyline(base, &polyline)?)
}

/// 转换单个源文件到 `out_dir`，失败不会中断调用方的批处理。
pub fn convert_item(
    kind: SourceKind,
    source: &Path,
    out_dir: &Path,
    namer: &mut OutputNamer,
    options: &ConversionOptions,
) -> ItemOutcome {
    let stem = file_stem(source);
    let name = namer.propose(options.prefix(kind), &stem);
    let base = out_dir.join(&name);

    let result = match kind {
        SourceKind::Line => decode_and_write(&AbLineDecoder, source, &stem, &base),
        SourceKind::Curve => decode_and_write(&CurveDecoder::new(options.curve), source, &stem, &base),
        SourceKind::Boundary => repair_boundary(source, &base, &stem, &options.boundary)
            .map(|summary| summary.output)
            .map_err(ConvertError::from),
    };

    match &result {
        Ok(output) => {
            namer.reserve(&name);
            info!(
                kind = kind.label(),
                source = %source.display(),
                output = %output.display(),
                "转换完成"
            );
        }
        Err(err) => {
            warn!(kind = kind.label(), source = %source.display(), error = %err, "转换失败");
        }
    }

    ItemOutcome {
        kind,
        source: source.to_path_buf(),
        result,
    }
}

/// 把一组同类源文件直接转换到 `out_dir`（不涉及目录树替换）。
pub fn convert_files(
    kind: SourceKind,
    files: &[PathBuf],
    out_dir: &Path,
    options: &ConversionOptions,
) -> Result<Vec<ItemOutcome>, EngineError> {
    fs::create_dir_all(out_dir).map_err(|source| EngineError::OutputDir {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let mut namer = OutputNamer::default();
    Ok(files
        .iter()
        .map(|file| convert_item(kind, file, out_dir, &mut namer, options))
        .collect())
}
