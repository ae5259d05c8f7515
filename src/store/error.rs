//! Record store error types

use thiserror::Error;

/// PostgreSQL error codes we surface as constraint failures
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Raised by `MemoryStore` fault injection
    #[error("Injected fault: {0}")]
    Fault(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        StoreError::NotFound { entity, id }
    }

    /// Error code for logs and API responses
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "NOT_FOUND",
            StoreError::Constraint(_) => "CONSTRAINT_VIOLATION",
            StoreError::Database(_) => "DATABASE_ERROR",
            StoreError::Fault(_) => "INJECTED_FAULT",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e
            && let Some(code) = db_err.code()
            && (code == FOREIGN_KEY_VIOLATION
                || code == CHECK_VIOLATION
                || code == NUMERIC_VALUE_OUT_OF_RANGE)
        {
            return StoreError::Constraint(db_err.message().to_string());
        }
        StoreError::Database(e)
    }
}

/// Map `RowNotFound` from a `fetch_one` to a typed `NotFound`
pub(crate) fn or_not_found(entity: &'static str, id: i64) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| match e {
        sqlx::Error::RowNotFound => StoreError::not_found(entity, id),
        other => StoreError::from(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(StoreError::not_found("account", 1).code(), "NOT_FOUND");
        assert_eq!(StoreError::Constraint("fk".into()).code(), "CONSTRAINT_VIOLATION");
        assert_eq!(StoreError::Fault("boom".into()).code(), "INJECTED_FAULT");
    }

    #[test]
    fn test_row_not_found_mapping() {
        let err = or_not_found("transfer", 42)(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "transfer 42 not found");
    }

    #[test]
    fn test_other_sqlx_errors_are_database_errors() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Database(sqlx::Error::PoolTimedOut)));
    }
}
