use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/**
 * Application error type - miette diagnostics for caller-facing errors
 *
 * Every variant maps onto one `ErrorKind` so a stage can capture the
 * failure category without holding on to the (non-cloneable) source error.
 */
#[derive(Error, Debug, Diagnostic)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(bucket::invalid_argument),
        help("The value is malformed; this is a caller bug and will not succeed on retry")
    )]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    #[diagnostic(code(bucket::io_error))]
    Io(#[from] std::io::Error),

    #[error("IO error: {message}")]
    #[diagnostic(code(bucket::io_error_detailed))]
    IoDetailed {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("Archive error: {message}")]
    #[diagnostic(
        code(bucket::archive_error),
        help("Ensure the archive file is not corrupted and is a supported format")
    )]
    Archive {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("Unsupported checksum algorithm: '{0}'")]
    #[diagnostic(
        code(bucket::unsupported_algorithm),
        help("Supported algorithms: blake3, sha224, sha256, sha384, sha512")
    )]
    UnsupportedAlgorithm(String),

    #[error("Unsupported content type '{mime}' for '{}'", path.display())]
    #[diagnostic(code(bucket::unsupported_content_type))]
    UnsupportedContentType { mime: String, path: PathBuf },

    #[error("Unsafe archive member '{member}': {reason}")]
    #[diagnostic(
        code(bucket::unsafe_archive_member),
        help("The archive tries to write outside of its extraction directory and was not extracted")
    )]
    UnsafeArchiveMember { member: String, reason: String },

    #[error("Already processed: {0}")]
    #[diagnostic(code(bucket::already_processed))]
    AlreadyProcessed(String),

    #[error("Replica limit reached: {limit} replicas already exist within '{}'", dir.display())]
    #[diagnostic(code(bucket::replica_limit_exceeded))]
    ReplicaLimitExceeded { limit: usize, dir: PathBuf },

    #[error("Configuration error: {0}")]
    #[diagnostic(code(bucket::config_error))]
    Config(String),
}

/// Failure categories reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    #[serde(rename = "IOError")]
    IoError,
    UnsupportedAlgorithm,
    UnsupportedContentType,
    UnsafeArchiveMember,
    AlreadyProcessed,
    ReplicaLimitExceeded,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidArgument(_) | AppError::Config(_) => ErrorKind::InvalidArgument,
            AppError::Io(_) | AppError::IoDetailed { .. } | AppError::Archive { .. } => {
                ErrorKind::IoError
            }
            AppError::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            AppError::UnsupportedContentType { .. } => ErrorKind::UnsupportedContentType,
            AppError::UnsafeArchiveMember { .. } => ErrorKind::UnsafeArchiveMember,
            AppError::AlreadyProcessed(_) => ErrorKind::AlreadyProcessed,
            AppError::ReplicaLimitExceeded { .. } => ErrorKind::ReplicaLimitExceeded,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        AppError::InvalidArgument(message.into())
    }

    pub fn archive_error(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        AppError::Archive {
            message: message.into(),
            path,
        }
    }

    pub fn unsafe_member(member: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::UnsafeArchiveMember {
            member: member.into(),
            reason: reason.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        AppError::Config(message.into())
    }

    /**
     * Detailed IO error carrying the path that failed
     */
    pub fn io_error(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        AppError::IoDetailed {
            message: message.into(),
            path,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            AppError::invalid_argument("bad").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            AppError::config_error("bad").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            AppError::io_error("boom", None).kind(),
            ErrorKind::IoError
        );
        assert_eq!(
            AppError::unsafe_member("../evil", "escapes").kind(),
            ErrorKind::UnsafeArchiveMember
        );
        assert_eq!(
            AppError::ReplicaLimitExceeded {
                limit: 100,
                dir: PathBuf::from("/tmp")
            }
            .kind(),
            ErrorKind::ReplicaLimitExceeded
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let app_error: AppError = io_error.into();

        assert!(matches!(app_error, AppError::Io(_)));
        assert_eq!(app_error.kind(), ErrorKind::IoError);
    }

    #[test]
    fn test_error_kind_serializes_taxonomy_names() {
        let json = serde_json::to_string(&ErrorKind::IoError).unwrap();
        assert_eq!(json, "\"IOError\"");
        let json = serde_json::to_string(&ErrorKind::UnsafeArchiveMember).unwrap();
        assert_eq!(json, "\"UnsafeArchiveMember\"");
    }
}
