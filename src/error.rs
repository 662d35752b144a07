//! Error taxonomy shared by the store, the services and the worker pool.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidInput,
    Conflict,
    Cancelled,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The requested entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A caller-supplied value failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller's cancellation token fired before the operation ran.
    #[error("operation cancelled")]
    Cancelled,

    /// Unexpected store or infrastructure failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TaskError::NotFound(_) => ErrorCode::NotFound,
            TaskError::InvalidInput { .. } => ErrorCode::InvalidInput,
            TaskError::Conflict(_) => ErrorCode::Conflict,
            TaskError::Cancelled => ErrorCode::Cancelled,
            TaskError::Internal(_) => ErrorCode::InternalError,
        }
    }

    // Convenience constructors

    pub fn task_not_found(task_id: i64) -> Self {
        TaskError::NotFound(format!("task {}", task_id))
    }

    pub fn user_not_found(user_id: i64) -> Self {
        TaskError::NotFound(format!("user {}", user_id))
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        TaskError::InvalidInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        TaskError::Internal(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskError::NotFound(_))
    }
}

impl From<rusqlite::Error> for TaskError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, ref msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation
                    && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                TaskError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            other => TaskError::internal(other),
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::internal(err)
    }
}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        // Try to downcast to TaskError first
        match err.downcast::<TaskError>() {
            Ok(task_err) => task_err,
            Err(err) => TaskError::internal(err),
        }
    }
}

/// Result type for task operations.
pub type TaskResult<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_variants() {
        assert_eq!(TaskError::task_not_found(3).code(), ErrorCode::NotFound);
        assert_eq!(
            TaskError::invalid("title", "empty").code(),
            ErrorCode::InvalidInput
        );
        assert_eq!(TaskError::Conflict("x".into()).code(), ErrorCode::Conflict);
        assert_eq!(TaskError::Cancelled.code(), ErrorCode::Cancelled);
        assert_eq!(TaskError::internal("boom").code(), ErrorCode::InternalError);
    }

    #[test]
    fn anyhow_roundtrip_keeps_task_error() {
        let err: anyhow::Error = TaskError::task_not_found(7).into();
        let back: TaskError = err.into();
        assert!(back.is_not_found());
        assert_eq!(back.to_string(), "task 7 not found");
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: TaskError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert_eq!(err.code(), ErrorCode::Conflict);
    }

    #[test]
    fn error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::InternalError).unwrap();
        assert_eq!(json, "\"INTERNAL_ERROR\"");
    }
}
