use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the batch inference core.
///
/// Model-level errors (`ArchitectureMismatch`, `CheckpointNotFound`,
/// `AmbiguousCheckpoint`) abort the run before any image is processed.
/// Per-image errors (`UnreadableImage`, `WriteFailure`) skip one image only.
#[derive(Error, Debug)]
pub enum InferError {
    #[error("architecture mismatch for `{tensor}`: expected {expected}, found {actual}")]
    ArchitectureMismatch {
        tensor: String,
        expected: String,
        actual: String,
    },

    #[error("no checkpoint matching `{pattern}` in {}", dir.display())]
    CheckpointNotFound { dir: PathBuf, pattern: String },

    #[error("{} checkpoints match `{pattern}`: {}", candidates.len(), display_paths(candidates))]
    AmbiguousCheckpoint {
        pattern: String,
        candidates: Vec<PathBuf>,
    },

    #[error("unreadable image {}: {reason}", path.display())]
    UnreadableImage { path: PathBuf, reason: String },

    #[error("failed to write {}: {reason}", path.display())]
    WriteFailure { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("runtime error: {0:#}")]
    Runtime(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InferError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        InferError::UnreadableImage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn write_failure(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        InferError::WriteFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Fatal errors halt the batch; everything else is recorded against one image.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, InferError::UnreadableImage { .. } | InferError::WriteFailure { .. })
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T, E = InferError> = std::result::Result<T, E>;
