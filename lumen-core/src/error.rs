use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("scan queue is shutting down")]
    ShuttingDown,

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("stage `{stage}` failed: {message}")]
    Stage { stage: &'static str, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        ScanError::Stage {
            stage,
            message: message.into(),
        }
    }

    /// True for missing files or directories, which cleanup paths treat as
    /// already done.
    pub fn is_not_found(&self) -> bool {
        match self {
            ScanError::Io(err) | ScanError::Filesystem { source: err, .. } => {
                err.kind() == std::io::ErrorKind::NotFound
            }
            ScanError::NotFound(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
