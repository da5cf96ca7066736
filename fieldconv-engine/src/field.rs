use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::EngineError;
use crate::reconcile::WorkDir;

/// 圃场目录下可识别的三类源数据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Line,
    Boundary,
    Curve,
}

impl SourceKind {
    /// 圃场内的处理顺序。
    pub const ALL: [SourceKind; 3] = [SourceKind::Line, SourceKind::Boundary, SourceKind::Curve];

    pub fn directory_names(self) -> &'static [&'static str] {
        match self {
            SourceKind::Line => &["ABLines", "lines-source"],
            SourceKind::Boundary => &["Boundaries", "boundaries-source"],
            SourceKind::Curve => &["Curves", "curves-source"],
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SourceKind::Line => "ini",
            SourceKind::Boundary => "shp",
            SourceKind::Curve => "crv",
        }
    }

    /// 边界只看子目录第一层；直线与曲线递归查找。
    pub fn recursive(self) -> bool {
        !matches!(self, SourceKind::Boundary)
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Line => "AB line",
            SourceKind::Boundary => "boundary",
            SourceKind::Curve => "curve",
        }
    }

    pub fn from_directory_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            kind.directory_names()
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(name))
        })
    }

    pub fn matches_file(self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(self.extension()))
    }

    /// 源子目录中待转换的文件，按路径排序。
    pub fn source_files(self, dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
        let mut walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
        if !self.recursive() {
            walker = walker.max_depth(1);
        }
        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|source| EngineError::Walk {
                root: dir.to_path_buf(),
                source,
            })?;
            if entry.file_type().is_file() && self.matches_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// 直接包含至少一个可识别子目录的目录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDirectory {
    pub path: PathBuf,
    /// 可识别的子目录，按 `SourceKind::ALL` 的顺序排列。
    pub sources: Vec<(SourceKind, PathBuf)>,
}

impl FieldDirectory {
    pub fn inspect(path: &Path) -> Result<Option<Self>, EngineError> {
        let list_error = |source| EngineError::ListDir {
            path: path.to_path_buf(),
            source,
        };
        let mut sources = Vec::new();
        for entry in fs::read_dir(path).map_err(list_error)? {
            let entry = entry.map_err(list_error)?;
            if !entry.file_type().map_err(list_error)?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(kind) = name.to_str().and_then(SourceKind::from_directory_name) {
                sources.push((kind, entry.path()));
            }
        }
        if sources.is_empty() {
            return Ok(None);
        }
        sources.sort();
        Ok(Some(Self {
            path: path.to_path_buf(),
            sources,
        }))
    }
}

/// 自底向上（最深处优先）列出 `root` 下的全部圃场目录，`root` 自身也参与判定。
pub fn discover_fields(root: &Path) -> Result<Vec<FieldDirectory>, EngineError> {
    let walker = WalkDir::new(root)
        .contents_first(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| WorkDir::parse(entry.file_name()).is_none());

    let mut fields = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|source| EngineError::Walk {
            root: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(field) = FieldDirectory::inspect(entry.path())? {
            debug!(
                path = %field.path.display(),
                sources = field.sources.len(),
                "发现圃场目录"
            );
            fields.push(field);
        }
    }
    Ok(fields)
}
