use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Internal error type for scan and install operations.
///
/// Per-entry failures are usually caught and recorded by the caller; only
/// cancellation and fatal conditions unwind a whole operation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("7z error: {0}")]
    SevenZ(String),

    #[error("RAR error: {0}")]
    Rar(String),

    #[error("Staging failed for {name}: {reason}")]
    Staging { name: String, reason: String },

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Archive chain segment '{segment}' not found in {archive}")]
    ChainSegmentNotFound { archive: String, segment: String },

    #[error("Plan not found: {}", .0.display())]
    PlanNotFound(PathBuf),

    #[error("Plan format error: {0}")]
    PlanFormat(#[from] serde_json::Error),

    #[error("Invalid configuration in {}: {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    #[error("Unsafe entry path: {0}")]
    UnsafePath(String),

    #[error("Insufficient disk space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("Operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn staging(name: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Staging {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Structured error codes carried inside operation results
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorCode {
    /// Input validation failed (invalid path, malformed data, etc.)
    ValidationFailed,
    /// Permission denied (destination creation, file access)
    PermissionDenied,
    /// Resource not found (plan, archive, entry)
    NotFound,
    /// Data is corrupted or in unexpected format
    CorruptedData,
    /// Archive-related error (open or decompress failure)
    ArchiveError,
    /// Operation was cancelled
    Cancelled,
    /// Disk space insufficient
    InsufficientSpace,
    /// Path traversal detected
    SecurityViolation,
    /// Internal error (unexpected condition)
    Internal,
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiErrorCode::ValidationFailed => write!(f, "validation_failed"),
            ApiErrorCode::PermissionDenied => write!(f, "permission_denied"),
            ApiErrorCode::NotFound => write!(f, "not_found"),
            ApiErrorCode::CorruptedData => write!(f, "corrupted_data"),
            ApiErrorCode::ArchiveError => write!(f, "archive_error"),
            ApiErrorCode::Cancelled => write!(f, "cancelled"),
            ApiErrorCode::InsufficientSpace => write!(f, "insufficient_space"),
            ApiErrorCode::SecurityViolation => write!(f, "security_violation"),
            ApiErrorCode::Internal => write!(f, "internal"),
        }
    }
}

/// Structured error with code, message, and optional details
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: ApiErrorCode,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details.into()),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::ValidationFailed, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::NotFound, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Internal, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl From<&EngineError> for ApiError {
    fn from(err: &EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::Io { path, source } => {
                let code = match source.kind() {
                    std::io::ErrorKind::NotFound => ApiErrorCode::NotFound,
                    std::io::ErrorKind::PermissionDenied => ApiErrorCode::PermissionDenied,
                    _ => ApiErrorCode::Internal,
                };
                ApiError::with_details(code, message, path.display().to_string())
            }
            EngineError::Zip(_)
            | EngineError::SevenZ(_)
            | EngineError::Rar(_)
            | EngineError::UnsupportedFormat(_)
            | EngineError::Staging { .. } => ApiError::new(ApiErrorCode::ArchiveError, message),
            EngineError::ChainSegmentNotFound { .. } | EngineError::PlanNotFound(_) => {
                ApiError::not_found(message)
            }
            EngineError::PlanFormat(_) => ApiError::new(ApiErrorCode::CorruptedData, message),
            EngineError::Config { .. } => ApiError::validation(message),
            EngineError::UnsafePath(_) => ApiError::new(ApiErrorCode::SecurityViolation, message),
            EngineError::InsufficientSpace { .. } => {
                ApiError::new(ApiErrorCode::InsufficientSpace, message)
            }
            EngineError::Cancelled => ApiError::cancelled(message),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::from(&err)
    }
}
