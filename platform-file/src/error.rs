use std::io;
use std::path::{Path, PathBuf};
use sweeprun_core::error::PlatformError;
use thiserror::Error;

/// Failures of the on-disk backend, translated into the core's
/// [`PlatformError`] at the operations boundary.
#[derive(Error, Debug)]
pub enum FilePlatformError {
    #[error("I/O failure at {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No directory found for '{0}' under the job tree")]
    DirectoryNotFound(String),
    #[error("Invalid file pattern '{0}': {1}")]
    BadPattern(String, String),
    #[error("Corrupt metadata at {path:?}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl FilePlatformError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }

    pub fn metadata(path: &Path, source: serde_json::Error) -> Self {
        Self::Metadata {
            path: path.to_owned(),
            source,
        }
    }
}

/// Translate into the core error taxonomy. Everything on a local disk is
/// permanent; there is no transient failure mode to retry.
pub(crate) fn platform_err(operation: &str, id: &str, err: FilePlatformError) -> PlatformError {
    match err {
        FilePlatformError::Io { path: _, source } => PlatformError::io(operation, id, source),
        other => PlatformError::Permanent {
            operation: operation.to_owned(),
            id: id.to_owned(),
            reason: other.to_string(),
        },
    }
}
