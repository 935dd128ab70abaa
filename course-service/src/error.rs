//! Domain errors for course-service.

use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CourseError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    InvalidFields(#[from] validator::ValidationErrors),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("transaction conflict during {operation}")]
    TransactionConflict { operation: String },

    #[error("database error: {0}")]
    Database(anyhow::Error),
}

pub type Result<T, E = CourseError> = std::result::Result<T, E>;

impl CourseError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CourseError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        CourseError::InvalidState(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CourseError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        CourseError::Forbidden(message.into())
    }

    pub fn conflict(operation: impl Into<String>) -> Self {
        CourseError::TransactionConflict {
            operation: operation.into(),
        }
    }

    /// Only aborted transactions are worth re-running from fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CourseError::TransactionConflict { .. })
    }

    /// Short label used for the error metric.
    pub fn kind(&self) -> &'static str {
        match self {
            CourseError::NotFound { .. } => "not_found",
            CourseError::InvalidState(_) => "invalid_state",
            CourseError::Validation(_) | CourseError::InvalidFields(_) => "validation",
            CourseError::Forbidden(_) => "forbidden",
            CourseError::TransactionConflict { .. } => "transaction_conflict",
            CourseError::Database(_) => "database",
        }
    }
}

/// Postgres aborts with 40001 (serialization failure) or 40P01 (deadlock)
/// when concurrent transactions collide; both are safe to retry.
pub(crate) fn from_sqlx(operation: &str, err: sqlx::Error) -> CourseError {
    if let sqlx::Error::Database(ref db_err) = err {
        if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
            return CourseError::conflict(operation);
        }
    }
    CourseError::Database(anyhow::anyhow!("{} failed: {}", operation, err))
}

impl From<CourseError> for AppError {
    fn from(err: CourseError) -> Self {
        match err {
            CourseError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            CourseError::InvalidState(_) => AppError::Conflict(anyhow::anyhow!(err.to_string())),
            CourseError::Validation(_) => AppError::InvalidInput(anyhow::anyhow!(err.to_string())),
            CourseError::InvalidFields(errors) => AppError::ValidationError(errors),
            CourseError::Forbidden(_) => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            CourseError::TransactionConflict { .. } => {
                AppError::ServiceUnavailable(anyhow::anyhow!(err.to_string()))
            }
            CourseError::Database(source) => AppError::DatabaseError(source),
        }
    }
}
