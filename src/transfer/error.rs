//! Transfer Error Types

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Why a transfer did not commit.
///
/// Except for `RollbackFailed`, a returned error means nothing from the
/// attempt is visible in the store.
#[derive(Error, Debug)]
pub enum TransferError {
    // === Boundary Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Source and destination account cannot be the same")]
    SameAccount,

    // === Scope Errors ===
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("Transfer write failed: {0}")]
    WriteFailed(#[source] StoreError),

    #[error("Transfer write failed: {cause}; rollback also failed: {rollback}")]
    RollbackFailed {
        #[source]
        cause: StoreError,
        rollback: StoreError,
    },

    #[error("Commit failed: {0}")]
    CommitFailed(#[source] StoreError),

    /// Raised before commit only; the scope was rolled back
    #[error("Transfer timed out after {0:?}")]
    Timeout(Duration),
}

impl TransferError {
    /// Error code for logs and API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::SameAccount => "SAME_ACCOUNT",
            TransferError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            TransferError::WriteFailed(_) => "WRITE_FAILED",
            TransferError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            TransferError::CommitFailed(_) => "COMMIT_FAILED",
            TransferError::Timeout(_) => "TIMEOUT",
        }
    }

    /// The store error that caused the failure, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            TransferError::StoreUnavailable(e)
            | TransferError::WriteFailed(e)
            | TransferError::CommitFailed(e) => Some(e),
            TransferError::RollbackFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Whether a caller may safely try again. The core never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::StoreUnavailable(_)
            | TransferError::CommitFailed(_)
            | TransferError::Timeout(_) => true,
            TransferError::WriteFailed(e) => matches!(e, StoreError::Database(_)),
            _ => false,
        }
    }

    /// Store state after a failed rollback is unknown
    pub fn requires_reconciliation(&self) -> bool {
        matches!(self, TransferError::RollbackFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_codes() {
        assert_eq!(TransferError::SameAccount.code(), "SAME_ACCOUNT");
        assert_eq!(TransferError::InvalidAmount.code(), "INVALID_AMOUNT");
        assert_eq!(
            TransferError::Timeout(Duration::from_secs(1)).code(),
            "TIMEOUT"
        );
    }

    #[test]
    fn test_write_failed_keeps_original_cause() {
        let err = TransferError::WriteFailed(StoreError::not_found("account", 9));
        let source = err.source().expect("cause must be attached");
        assert_eq!(source.to_string(), "account 9 not found");
        assert!(err.store_error().unwrap().is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rollback_failed_reports_both_errors() {
        let err = TransferError::RollbackFailed {
            cause: StoreError::Fault("entry".into()),
            rollback: StoreError::Fault("rollback".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("Injected fault: entry"));
        assert!(msg.contains("rollback also failed: Injected fault: rollback"));
        assert!(err.requires_reconciliation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(TransferError::StoreUnavailable(StoreError::Database(sqlx::Error::PoolTimedOut))
            .is_retryable());
        assert!(!TransferError::SameAccount.is_retryable());
    }
}
