use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Stream fetch error: {0}")]
    StreamFetch(String),

    #[error("Mux error (exit code {code:?}): {message}")]
    Mux { code: Option<i32>, message: String },

    #[error("Output folder {path:?} is unusable: {reason}")]
    Folder { path: PathBuf, reason: String },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Download scheduler is no longer running")]
    SchedulerStopped,
}

/// Coarse classification used when reporting a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Metadata,
    StreamFetch,
    Mux,
    Folder,
    Cancellation,
    Other,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Metadata(_) | AppError::NotFound(_) | AppError::Unavailable(_) => {
                ErrorKind::Metadata
            }
            AppError::StreamFetch(_) | AppError::Http(_) => ErrorKind::StreamFetch,
            AppError::Mux { .. } => ErrorKind::Mux,
            AppError::Folder { .. } => ErrorKind::Folder,
            AppError::Cancelled => ErrorKind::Cancellation,
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Json(_)
            | AppError::Validation(_)
            | AppError::SchedulerStopped => {
                ErrorKind::Other
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
