//! 圃场替换流程：在圃场的父目录中建立隐藏暂存区，转换完成后用两次重命名
//! 换入；任何时刻崩溃都只会留下可识别的残留目录，由 [`recover_interrupted`] 收尾。

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::convert::{ConversionOptions, OutputNamer, convert_item};
use crate::errors::EngineError;
use crate::field::{FieldDirectory, discover_fields};
use crate::report::{BatchReport, FieldDisposition, FieldReport};

const STAGING_MARK: &str = ".fieldconv-staging-";
const BACKUP_SUFFIX: &str = ".fieldconv-old";

/// 替换过程中的临时目录：`.<圃场名>.fieldconv-staging-XXXX` 与 `.<圃场名>.fieldconv-old`。
/// 圃场名按原始字节保存，非 UTF-8 名称也能原样恢复。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkDir<'a> {
    Staging { field: &'a OsStr },
    Backup { field: &'a OsStr },
}

impl<'a> WorkDir<'a> {
    pub(crate) fn parse(name: &'a OsStr) -> Option<Self> {
        let rest = name.as_encoded_bytes().strip_prefix(b".")?;
        if let Some(field) = rest.strip_suffix(BACKUP_SUFFIX.as_bytes()) {
            return Some(WorkDir::Backup {
                field: field_from_bytes(field)?,
            });
        }
        let mark = STAGING_MARK.as_bytes();
        let at = rest.windows(mark.len()).rposition(|window| window == mark)?;
        Some(WorkDir::Staging {
            field: field_from_bytes(&rest[..at])?,
        })
    }

    fn field(self) -> &'a OsStr {
        match self {
            WorkDir::Staging { field } | WorkDir::Backup { field } => field,
        }
    }
}

fn field_from_bytes(bytes: &[u8]) -> Option<&OsStr> {
    if bytes.is_empty() {
        return None;
    }
    // SAFETY: `bytes` 来自 `OsStr::as_encoded_bytes`，只在 ASCII 标记处切分。
    Some(unsafe { OsStr::from_encoded_bytes_unchecked(bytes) })
}

fn work_dir_name(field_name: &OsStr, suffix: &str) -> OsString {
    let mut name = OsString::from(".");
    name.push(field_name);
    name.push(suffix);
    name
}

fn staging_prefix(field_name: &OsStr) -> OsString {
    work_dir_name(field_name, STAGING_MARK)
}

fn backup_name(field_name: &OsStr) -> OsString {
    work_dir_name(field_name, BACKUP_SUFFIX)
}

/// 父目录；相对路径的空父目录视为当前目录。
fn parent_dir(path: &Path) -> Option<&Path> {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Some(Path::new(".")),
        other => other,
    }
}

fn field_name(path: &Path) -> Result<&OsStr, EngineError> {
    path.file_name().ok_or_else(|| EngineError::NoParent {
        path: path.to_path_buf(),
    })
}

pub struct Reconciler {
    options: ConversionOptions,
}

impl Reconciler {
    pub fn new(options: ConversionOptions) -> Self {
        Self { options }
    }

    /// 就地转换整棵目录树。单个文件或单个圃场的失败只记录在报告中。
    pub fn convert_tree(&self, root: &Path) -> Result<BatchReport, EngineError> {
        let recovered = recover_interrupted(root)?;
        if !root.is_dir() {
            return Err(EngineError::NotADirectory {
                path: root.to_path_buf(),
            });
        }
        let root = root.canonicalize().map_err(|source| EngineError::ListDir {
            path: root.to_path_buf(),
            source,
        })?;

        let fields = discover_fields(&root)?;
        info!(root = %root.display(), fields = fields.len(), "开始转换目录树");

        let mut reports = Vec::with_capacity(fields.len());
        for field in &fields {
            let report = self.convert_field(field).unwrap_or_else(|err| {
                warn!(path = %field.path.display(), error = %err, "圃场处理失败，保留原目录");
                FieldReport {
                    path: field.path.clone(),
                    disposition: FieldDisposition::Failed {
                        error: err.to_string(),
                    },
                    items: Vec::new(),
                }
            });
            reports.push(report);
        }

        let report = BatchReport {
            root,
            recovered,
            fields: reports,
        };
        info!(
            converted = report.converted(),
            failed = report.failed(),
            fields = report.fields.len(),
            "目录树转换结束"
        );
        Ok(report)
    }

    /// 转换一个圃场：输出先写入暂存区，非空时再换入圃场路径。
    pub fn convert_field(&self, field: &FieldDirectory) -> Result<FieldReport, EngineError> {
        let parent = parent_dir(&field.path).ok_or_else(|| EngineError::NoParent {
            path: field.path.clone(),
        })?;
        let name = field_name(&field.path)?;
        let staging = tempfile::Builder::new()
            .prefix(&staging_prefix(name))
            .tempdir_in(parent)
            .map_err(|source| EngineError::OutputDir {
                path: parent.to_path_buf(),
                source,
            })?;

        let mut namer = OutputNamer::default();
        let mut items = Vec::new();
        for (kind, dir) in &field.sources {
            for file in kind.source_files(dir)? {
                items.push(convert_item(*kind, &file, staging.path(), &mut namer, &self.options));
            }
        }

        let produced = items.iter().filter(|item| item.is_success()).count();
        let disposition = if produced == 0 && !self.options.replace_empty_fields {
            info!(path = %field.path.display(), "没有可用输出，保留原目录");
            FieldDisposition::SkippedEmpty
        } else {
            swap_in(staging, &field.path, parent, name)?;
            info!(path = %field.path.display(), outputs = produced, "圃场目录已替换");
            if produced == 0 {
                FieldDisposition::Emptied
            } else {
                FieldDisposition::Replaced
            }
        };

        Ok(FieldReport {
            path: field.path.clone(),
            disposition,
            items,
        })
    }
}

/// 圃场 → 备份，暂存区 → 圃场，再删除备份。第二次重命名失败时回滚。
fn swap_in(staging: TempDir, field: &Path, parent: &Path, name: &OsStr) -> Result<(), EngineError> {
    let swap_error = |source| EngineError::Swap {
        field: field.to_path_buf(),
        source,
    };
    let backup = parent.join(backup_name(name));
    if backup.exists() {
        fs::remove_dir_all(&backup).map_err(swap_error)?;
    }

    let permissions = fs::metadata(field).map_err(swap_error)?.permissions();
    fs::set_permissions(staging.path(), permissions).map_err(swap_error)?;

    fs::rename(field, &backup).map_err(swap_error)?;
    if let Err(source) = fs::rename(staging.path(), field) {
        if let Err(rollback) = fs::rename(&backup, field) {
            warn!(
                backup = %backup.display(),
                error = %rollback,
                "回滚失败，下次运行时将自动恢复"
            );
        }
        return Err(swap_error(source));
    }
    // 暂存路径已不存在，`TempDir` 析构时的删除会静默失败。
    drop(staging);

    if let Err(err) = fs::remove_dir_all(&backup) {
        warn!(backup = %backup.display(), error = %err, "删除旧内容失败，下次运行时清理");
    }
    Ok(())
}

/// 处理上次运行中断留下的暂存区与备份目录，返回处理的数量。
///
/// 备份存在而圃场缺失时把备份恢复为圃场（回滚）；两者都在时说明替换已完成，删除备份。
/// 暂存区一律删除。`root` 自身的残留位于其父目录中，同样会被检查。
pub fn recover_interrupted(root: &Path) -> Result<usize, EngineError> {
    let mut handled = 0;
    if let (Some(parent), Some(name)) = (parent_dir(root), root.file_name()) {
        if parent.is_dir() {
            handled += recover_in(parent, Some(name))?;
        }
    }
    if !root.is_dir() {
        return Ok(handled);
    }

    let mut dirs = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| WorkDir::parse(entry.file_name()).is_none());
    for entry in walker {
        let entry = entry.map_err(|source| EngineError::Walk {
            root: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    for dir in dirs {
        handled += recover_in(&dir, None)?;
    }
    Ok(handled)
}

fn recover_in(dir: &Path, only_field: Option<&OsStr>) -> Result<usize, EngineError> {
    let list_error = |source| EngineError::ListDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut leftovers: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir).map_err(list_error)? {
        let entry = entry.map_err(list_error)?;
        let path = entry.path();
        let file_name = entry.file_name();
        let Some(work) = WorkDir::parse(&file_name) else {
            continue;
        };
        if only_field.map_or(true, |only| only == work.field()) && path.is_dir() {
            leftovers.push(path);
        }
    }
    leftovers.sort();

    let mut handled = 0;
    for path in leftovers {
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let recover_error = |source| EngineError::Recover {
            path: path.clone(),
            source,
        };
        match WorkDir::parse(file_name) {
            Some(WorkDir::Staging { .. }) => {
                fs::remove_dir_all(&path).map_err(recover_error)?;
                warn!(path = %path.display(), "删除中断遗留的暂存区");
            }
            Some(WorkDir::Backup { field }) => {
                let target = dir.join(field);
                if target.exists() {
                    fs::remove_dir_all(&path).map_err(recover_error)?;
                    warn!(path = %path.display(), "替换已完成，删除遗留备份");
                } else {
                    fs::rename(&path, &target).map_err(recover_error)?;
                    warn!(path = %target.display(), "替换中断，已从备份恢复原目录");
                }
            }
            None => continue,
        }
        handled += 1;
    }
    Ok(handled)
}
