//! Error kinds for the public operation surface.
//!
//! Every operation exposed by the server returns either a success record or
//! one of these kinds. Deeper layers may wrap I/O or SQL errors freely, but
//! nothing outside this closed set crosses a component boundary.

use thiserror::Error;

/// The closed set of error kinds returned by every public operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Project, document, task file, or plan not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// A create operation targeted a path that already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed status value, invalid event type, malformed query, bad filename.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Path-traversal attempt, path outside the workspace root, invalid project name.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Webhook URL failed the SSRF filter.
    #[error("unsafe: {0}")]
    Unsafe(String),

    /// Subscription cap hit.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Write attempted in read-only mode, or auth failure at the boundary.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A concurrent modification raced a write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Index inconsistent with the filesystem in a way reindex cannot repair.
    #[error("index corrupt: {0}")]
    Corrupt(String),

    /// The underlying store reported a retryable error.
    #[error("transient: {0}")]
    Transient(String),
}

impl Error {
    /// Machine-readable code carried alongside the human message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::InvalidPath(_) => "invalid_path",
            Error::Unsafe(_) => "unsafe",
            Error::LimitExceeded(_) => "limit_exceeded",
            Error::PermissionDenied(_) => "permission_denied",
            Error::Conflict(_) => "conflict",
            Error::Corrupt(_) => "corrupt",
            Error::Transient(_) => "transient",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Transient(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => Error::AlreadyExists(err.to_string()),
            _ => Error::Transient(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
