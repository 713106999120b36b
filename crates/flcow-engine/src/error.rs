use std::io;
use std::path::PathBuf;

use nix::errno::Errno;

/// Failure of a single duplication attempt.
///
/// Every variant is raised before the original directory entry is touched,
/// except `Rename`, which leaves the original in place as well: the
/// temporary copy is always removed before the error is returned.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("empty path")]
    InvalidPath,

    #[error("cannot open source: {0}")]
    Open(#[source] Errno),

    #[error("cannot stat source: {0}")]
    Stat(#[source] io::Error),

    #[error("source is not a regular file")]
    NotRegular,

    #[error("cannot create temporary {path:?}: {source}")]
    CreateTemp {
        path: PathBuf,
        #[source]
        source: Errno,
    },

    #[error("cannot map source: {0}")]
    Map(#[source] io::Error),

    #[error("cannot copy into temporary: {0}")]
    Write(#[source] io::Error),

    #[error("cannot transfer ownership: {0}")]
    Chown(#[source] io::Error),

    #[error("cannot restore permissions: {0}")]
    Chmod(#[source] io::Error),

    #[error("cannot replace original: {0}")]
    Rename(#[source] Errno),
}

impl EngineError {
    /// Short name of the failed step, for structured logs.
    pub fn step(&self) -> &'static str {
        match self {
            EngineError::InvalidPath => "path",
            EngineError::Open(_) => "open",
            EngineError::Stat(_) => "stat",
            EngineError::NotRegular => "kind",
            EngineError::CreateTemp { .. } => "create",
            EngineError::Map(_) => "map",
            EngineError::Write(_) => "write",
            EngineError::Chown(_) => "chown",
            EngineError::Chmod(_) => "chmod",
            EngineError::Rename(_) => "rename",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
