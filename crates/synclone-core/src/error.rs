use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("no checkpoint at {}", path.display())]
    NotFound { path: PathBuf },
    #[error("checkpoint i/o on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint {} is not valid json: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CheckpointError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CheckpointError::NotFound { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that abort a whole sync operation. Per-repository failures never
/// surface here; they are recorded in the checkpoint instead.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid sync request: {0}")]
    Validation(String),
    #[error("repository discovery failed: {0:#}")]
    Discovery(#[source] anyhow::Error),
}

impl SyncError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }
}
