use std::path::PathBuf;

use runbox_core::ErrorKind;
use thiserror::Error;

/// Errors surfaced by the engine to the service layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::Internal(_) => ErrorKind::Internal,
            EngineError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            EngineError::InvalidArgument(message)
            | EngineError::NotFound(message)
            | EngineError::AlreadyExists(message)
            | EngineError::Internal(message)
            | EngineError::DeadlineExceeded(message) => message,
        }
    }
}

/// Errors returned while loading static job definitions.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("jobs file does not exist: {0}")]
    MissingPath(String),
    #[error("failed to read jobs from {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse jobs from {path}: {message}")]
    Parse { path: String, message: String },
    #[error("failed to register static job: {0}")]
    Rejected(#[from] EngineError),
}

impl SeedError {
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SeedError::Io {
            path: path.into().display().to_string(),
            source,
        }
    }

    pub fn parse_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SeedError::Parse {
            path: path.into().display().to_string(),
            message: message.into(),
        }
    }
}
