//! Error types for the motif orchestration engine.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using motif's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for motif operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Target document inaccessible. Fatal: no batches are created.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Malformed wildcard selector. Fatal for that selector only.
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// Every selector in a submission resolved to zero targets.
    #[error("No selector matched any target in the document")]
    NoMatchingTargets,

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Batch not found
    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),

    /// Retry requested but no batch is eligible.
    #[error("Nothing to retry for job {0}")]
    NothingToRetry(Uuid),

    /// Operation rejected because the job is already terminal.
    #[error("Job {0} is already in a terminal state")]
    AlreadyTerminal(Uuid),

    /// Submission refused by admission control. Nothing was persisted;
    /// the caller may retry later.
    #[error("Submission rejected: {0}")]
    AdmissionRejected(String),

    /// External renderer call failed. Recoverable, governed by RetryPolicy.
    #[error("Transform error: {0}")]
    Transform(String),

    /// Remote delivery failed. Recoverable; the local artifact is retained.
    #[error("Upload error: {0}")]
    Upload(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a failed renderer call with this error may be retried.
    ///
    /// Only external-call failures are recoverable; everything else is
    /// surfaced immediately.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Transform(_) | Error::Upload(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transform(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_document() {
        let err = Error::InvalidDocument("file ref abc not accessible".to_string());
        assert_eq!(err.to_string(), "Invalid document: file ref abc not accessible");
    }

    #[test]
    fn test_error_display_invalid_selector() {
        let err = Error::InvalidSelector {
            selector: "dish-\\".to_string(),
            reason: "trailing escape".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid selector 'dish-\\': trailing escape");
    }

    #[test]
    fn test_error_display_job_not_found() {
        let id = Uuid::nil();
        let err = Error::JobNotFound(id);
        assert_eq!(err.to_string(), format!("Job not found: {}", id));
    }

    #[test]
    fn test_error_display_already_terminal() {
        let id = Uuid::nil();
        let err = Error::AlreadyTerminal(id);
        assert_eq!(
            err.to_string(),
            format!("Job {} is already in a terminal state", id)
        );
    }

    #[test]
    fn test_transform_is_recoverable() {
        assert!(Error::Transform("renderer 500".into()).is_recoverable());
        assert!(Error::Upload("remote unreachable".into()).is_recoverable());
        assert!(!Error::InvalidDocument("gone".into()).is_recoverable());
        assert!(!Error::NoMatchingTargets.is_recoverable());
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
