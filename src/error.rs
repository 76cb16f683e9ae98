// Typed error surface for tpm. Every fallible operation in the transaction,
// manifest, store, and resolver layers returns `Result<T, TpmError>` so the
// CLI boundary can map failures to the exit codes in the external interface
// without re-parsing error strings.

use std::path::PathBuf;
use thiserror::Error;

use crate::schema::ToolId;

#[derive(Debug, Error)]
pub enum TpmError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} is already installed (use --force to reinstall)")]
    AlreadyExists(ToolId),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited, retry in {wait_seconds}s")]
    RateLimited { wait_seconds: i64 },

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: transaction rolled back ({failed_steps} step(s) failed during rollback)")]
    TransactionAborted {
        context: String,
        failed_steps: usize,
        #[source]
        inner: Box<TpmError>,
    },

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("{0}")]
    Busy(String),
}

impl TpmError {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TpmError::Filesystem { path: path.into(), source }
    }

    /// Maps to the process exit codes documented in spec.md §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            TpmError::Usage(_) => 2,
            TpmError::RateLimited { .. } => 3,
            TpmError::Network(_) => 4,
            TpmError::Unsupported { what, .. } if *what == "arch" => 5,
            TpmError::TransactionAborted { inner, .. } => inner.exit_code(),
            _ => 1,
        }
    }
}

impl From<std::io::Error> for TpmError {
    fn from(e: std::io::Error) -> Self {
        TpmError::fs(PathBuf::new(), e)
    }
}

impl From<ureq::Error> for TpmError {
    fn from(e: ureq::Error) -> Self {
        TpmError::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TpmError>;
