//! Error taxonomy shared across the pipeline, pool, and HTTP layer.
//!
//! Every fallible operation returns [`Result`]. The orchestrator retries only
//! errors classified as transient by [`Error::is_transient`]; everything else
//! propagates unchanged until the HTTP layer maps it to a status code.
//!
//! | Variant | Retried | HTTP |
//! |---------|---------|------|
//! | `Validation` | no | 400 |
//! | `NotFound` | no | 404 |
//! | `Conflict` | no | 409 |
//! | `Transient` | yes | 500 |
//! | `ModelNotRegistered` | no | 500 |
//! | `PipelineFatal` | no | 500 |
//! | `Cancelled` | no | — |
//! | `Internal` | no | 500 |

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad input at a boundary: missing fields, weights not summing to 1,
    /// invalid search query, unsupported content type.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-constraint violation (duplicate association, duplicate title).
    #[error("conflict: {0}")]
    Conflict(String),

    /// I/O, timeout, provider 5xx, or store serialization failure.
    /// The only retryable class.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The requested model name is not advertised by any pool provider.
    /// Treated as a deployment error, never retried.
    #[error("model not registered: {0}")]
    ModelNotRegistered(String),

    /// The pipeline cannot make progress: splitter produced nothing, the
    /// parser refused all output, or a constraint failed after generation.
    #[error("pipeline failure: {0}")]
    PipelineFatal(String),

    /// Explicit caller-initiated cancel. The document is left in place.
    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry with the same inputs could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Machine-readable taxonomy code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "ENTITY_NOT_FOUND",
            Error::Conflict(_) => "INVALID_ARGUMENT",
            Error::Transient(_) => "PROCESSING_ERROR",
            Error::ModelNotRegistered(_) => "MODEL_NOT_REGISTERED",
            Error::PipelineFatal(_) => "PROCESSING_ERROR",
            Error::Cancelled => "PROCESSING_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) => {
                // 23505 unique_violation, 40001 serialization_failure
                match db.code().as_deref() {
                    Some("23505") => Error::Conflict(db.message().to_string()),
                    Some("40001") | Some("40P01") => Error::Transient(db.message().to_string()),
                    _ => Error::Internal(err.to_string()),
                }
            }
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => Error::Transient(err.to_string()),
            _ => Error::Internal(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Error::Transient(err.to_string())
        } else {
            Error::Internal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(Error::Transient("503".into()).is_transient());
        assert!(!Error::Validation("bad".into()).is_transient());
        assert!(!Error::ModelNotRegistered("x".into()).is_transient());
        assert!(!Error::PipelineFatal("y".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_taxonomy_codes() {
        assert_eq!(Error::Validation("q".into()).code(), "VALIDATION_ERROR");
        assert_eq!(Error::NotFound("lib".into()).code(), "ENTITY_NOT_FOUND");
        assert_eq!(
            Error::ModelNotRegistered("m".into()).code(),
            "MODEL_NOT_REGISTERED"
        );
        assert_eq!(Error::Internal("io".into()).code(), "INTERNAL_ERROR");
    }
}
