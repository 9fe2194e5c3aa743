//! Error types for storage and domain operations.
//!
//! Maps database failures into a small taxonomy the delivery engine can
//! reason about: connectivity problems, missing rows, constraint violations,
//! bad input, and illegal status transitions.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for storage and domain operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database connectivity or transaction failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The requested status change is not allowed from the current status.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested message not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let error = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(error, CoreError::NotFound(_)));
    }

    #[test]
    fn pool_errors_map_to_database() {
        let error = CoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(error, CoreError::Database(_)));
        assert!(error.to_string().starts_with("Database error"));
    }
}
