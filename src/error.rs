use std::path::PathBuf;
use thiserror::Error;

/// Failures callers need to tell apart.
///
/// Operations return `anyhow::Result`; these variants are the root causes and
/// can be recovered with `err.downcast_ref::<NetworkError>()`.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Bad input, raised before anything is mutated.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Something has to be configured first.
    #[error("{0}")]
    PreconditionFailed(String),

    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{command}' failed with exit code {exit_code:?}: {stderr}")]
    ServiceCommand {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl NetworkError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Returns the `NetworkError` at the root of `err`, if there is one.
pub fn network_error(err: &anyhow::Error) -> Option<&NetworkError> {
    err.chain().find_map(|cause| cause.downcast_ref::<NetworkError>())
}
