use crate::driver::{DriverError, DriverErrorKind};
use thiserror::Error;

/// Errors returned by the transaction manager.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    /// `commit` or `rollback` without a current session.
    #[error("No active session: begin a transaction first")]
    NoActiveSession,

    /// The driver refused to start a transaction because one is already in
    /// progress on the session.
    #[error("Nested transactions are not supported: {0}")]
    NestedTransaction(DriverError),

    #[error("Storage driver error: {0}")]
    Driver(DriverError),
}

impl TransactionError {
    /// The underlying driver error, if any.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::NoActiveSession => None,
            Self::NestedTransaction(e) | Self::Driver(e) => Some(e),
        }
    }
}

impl From<DriverError> for TransactionError {
    fn from(err: DriverError) -> Self {
        match err.kind {
            DriverErrorKind::TransactionInProgress => Self::NestedTransaction(err),
            _ => Self::Driver(err),
        }
    }
}

/// Result type for transaction manager operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_rejection_maps_to_nested() {
        let err = DriverError::new(
            DriverErrorKind::TransactionInProgress,
            "Transaction already in progress",
        )
        .with_code(256);

        let mapped = TransactionError::from(err.clone());
        assert_eq!(mapped, TransactionError::NestedTransaction(err.clone()));
        assert_eq!(mapped.driver_error().and_then(|e| e.code), Some(256));
        assert_eq!(
            mapped.to_string(),
            "Nested transactions are not supported: TransactionInProgress: Transaction already in progress"
        );
    }

    #[test]
    fn test_other_errors_pass_through() {
        let err = DriverError::write_conflict("locked");
        assert_eq!(
            TransactionError::from(err.clone()),
            TransactionError::Driver(err)
        );
        assert!(TransactionError::NoActiveSession.driver_error().is_none());
    }
}
