//! 圃场目录树的整体转换：发现圃场、逐文件转换到暂存区、原子替换。

pub mod convert;
pub mod field;
pub mod reconcile;
pub mod report;

pub use convert::{ConversionOptions, ConvertError, ItemOutcome, OutputNamer, convert_files};
pub use field::{FieldDirectory, SourceKind, discover_fields};
pub use reconcile::{Reconciler, recover_interrupted};
pub use report::{BatchReport, FieldDisposition, FieldReport};

pub mod errors {
    use std::path::PathBuf;

    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("{path:?} is not a directory")]
        NotADirectory { path: PathBuf },
        #[error("failed to walk {root:?}: {source}")]
        Walk {
            root: PathBuf,
            #[source]
            source: walkdir::Error,
        },
        #[error("failed to list {path:?}: {source}")]
        ListDir {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("{path:?} has no parent directory to stage in")]
        NoParent { path: PathBuf },
        #[error("failed to prepare output directory {path:?}: {source}")]
        OutputDir {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("failed to swap converted output into {field:?}: {source}")]
        Swap {
            field: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("failed to recover interrupted work directory {path:?}: {source}")]
        Recover {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
    }
}
