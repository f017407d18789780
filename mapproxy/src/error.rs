//! Error types shared across the proxy.
//!
//! Every failure that can reach a client is a [`MapproxyError`]. The HTTP front
//! and the worker pool only care about its [`ErrorKind`], which is a closed set:
//!
//! ```text
//! NotFound       unknown frame/type, bad filename, out of range, sparse tile
//! Unavailable    generator not prepared yet (caller retries later)
//! FormatError    malformed resource definition
//! InternalError  collaborator contract violation, I/O on our own state
//! DatasetError   source dataset open/read failure
//! Aborted        client went away; nothing is written
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MapproxyError>;

/// Failure while opening or reading a source dataset.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{path}: {reason}")]
pub struct DatasetError {
    /// Path of the dataset that failed.
    pub path: PathBuf,
    /// Human-readable failure reason.
    pub reason: String,
}

impl DatasetError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors produced while routing and generating content.
#[derive(Debug, Error)]
pub enum MapproxyError {
    /// Requested entity does not exist (or is not servable).
    #[error("{0}")]
    NotFound(String),

    /// Generator exists but is not ready yet.
    #[error("{0}")]
    Unavailable(String),

    /// Resource definition or persisted state is malformed.
    #[error("Format error: {0}")]
    Format(String),

    /// Internal contract violation.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Source dataset failure.
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// The requester has gone away.
    #[error("Request aborted")]
    Aborted,

    /// I/O failure on the proxy's own files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MapproxyError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classifies this error into one of the closed error kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Format(_) => ErrorKind::FormatError,
            Self::Internal(_) | Self::Io(_) => ErrorKind::InternalError,
            Self::Dataset(_) => ErrorKind::DatasetError,
            Self::Aborted => ErrorKind::Aborted,
        }
    }

    /// Returns true for conditions the caller should retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable)
    }
}

impl From<serde_json::Error> for MapproxyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e.to_string())
    }
}

impl From<image::ImageError> for MapproxyError {
    fn from(e: image::ImageError) -> Self {
        Self::Internal(format!("image encoding failed: {}", e))
    }
}

/// Closed set of error kinds visible to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Unavailable,
    FormatError,
    InternalError,
    DatasetError,
    Aborted,
}

impl ErrorKind {
    /// HTTP status code reported for this kind.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Unavailable => 503,
            // client is gone, status is never sent
            ErrorKind::Aborted => 499,
            ErrorKind::FormatError | ErrorKind::InternalError | ErrorKind::DatasetError => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::FormatError => "FormatError",
            ErrorKind::InternalError => "InternalError",
            ErrorKind::DatasetError => "DatasetError",
            ErrorKind::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}
