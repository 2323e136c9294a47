//! Error handling for the posture camserver
//!
//! Failures are scoped to a single camera wherever possible. The worker and
//! manager loops catch these and log them with the camera id; nothing here is
//! allowed to escape the reconciliation loop.

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Source could not be opened or read (retried with backoff)
    #[error("Source unavailable for camera {camera_id}: {message}")]
    SourceUnavailable { camera_id: String, message: String },

    /// Per-camera configuration is missing or malformed
    #[error("Invalid config for camera {camera_id}: {message}")]
    ConfigInvalid { camera_id: String, message: String },

    /// Worker made no progress within the staleness window
    #[error("Stale worker: {0}")]
    StaleWorker(String),

    /// Perception engine failed (transport or protocol, not "no detection")
    #[error("Perception error: {0}")]
    Perception(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl Error {
    pub fn source_unavailable(camera_id: impl Into<String>, message: impl ToString) -> Self {
        Error::SourceUnavailable {
            camera_id: camera_id.into(),
            message: message.to_string(),
        }
    }

    pub fn config_invalid(camera_id: impl Into<String>, message: impl ToString) -> Self {
        Error::ConfigInvalid {
            camera_id: camera_id.into(),
            message: message.to_string(),
        }
    }

    /// Stable error code for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SourceUnavailable { .. } => "source_unavailable",
            Error::ConfigInvalid { .. } => "config_invalid",
            Error::StaleWorker(_) => "stale_worker",
            Error::Perception(_) => "perception",
            Error::NotFound(_) => "not_found",
            Error::Database(_) | Error::Sqlx(_) => "database",
            Error::Serialization(_) => "serialization",
            Error::Http(_) => "http",
            Error::Io(_) => "io",
            Error::Image(_) => "image",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether the error should be retried by the stream worker
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable { .. } | Error::Io(_) | Error::StaleWorker(_)
        )
    }
}
