//! Driver error types.

use thiserror::Error;

/// Error label attached to failures that are safe to retry as a whole
/// transaction.
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// Error label attached to commit failures whose outcome is unknown. Only the
/// commit should be retried.
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

/// Server error codes surfaced by the driver.
pub mod codes {
    pub const MAX_TIME_MS_EXPIRED: i32 = 50;
    pub const WRITE_CONFLICT: i32 = 112;
    pub const NO_SUCH_TRANSACTION: i32 = 251;
}

/// Categories of driver failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// `start_transaction` on a session whose transaction is still open.
    TransactionInProgress,
    /// Commit or abort without a started transaction.
    NoTransactionStarted,
    /// Operation not allowed in the session's current transaction state.
    InvalidState,
    /// Transaction options rejected by the driver.
    InvalidOptions,
    WriteConflict,
    NoSuchTransaction,
    MaxTimeExpired,
    Network,
    /// Any other server-side command failure.
    Command,
    /// Failure raised by application code running inside a transaction.
    Application,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TransactionInProgress => "TransactionInProgress",
            Self::NoTransactionStarted => "NoTransactionStarted",
            Self::InvalidState => "InvalidState",
            Self::InvalidOptions => "InvalidOptions",
            Self::WriteConflict => "WriteConflict",
            Self::NoSuchTransaction => "NoSuchTransaction",
            Self::MaxTimeExpired => "MaxTimeMSExpired",
            Self::Network => "Network",
            Self::Command => "Command",
            Self::Application => "Application",
        };
        f.write_str(name)
    }
}

/// An error reported by the storage driver.
///
/// Keeps the driver's category, server code and error labels so callers can
/// inspect them after the error passes through the transaction manager.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub code: Option<i32>,
    pub labels: Vec<String>,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            labels: Vec::new(),
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !self.has_label(&label) {
            self.labels.push(label);
        }
        self
    }

    /// Error raised by application code inside a transaction body.
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Application, message)
    }

    /// A write conflict, retryable as a whole transaction.
    pub fn write_conflict(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::WriteConflict, message)
            .with_code(codes::WRITE_CONFLICT)
            .with_label(TRANSIENT_TRANSACTION_ERROR)
    }

    /// The server no longer knows the transaction, retryable as a whole.
    pub fn no_such_transaction(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::NoSuchTransaction, message)
            .with_code(codes::NO_SUCH_TRANSACTION)
            .with_label(TRANSIENT_TRANSACTION_ERROR)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn is_transient(&self) -> bool {
        self.has_label(TRANSIENT_TRANSACTION_ERROR)
    }

    pub fn is_unknown_commit_result(&self) -> bool {
        self.has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
    }

    pub fn is_max_time_expired(&self) -> bool {
        self.kind == DriverErrorKind::MaxTimeExpired
            || self.code == Some(codes::MAX_TIME_MS_EXPIRED)
    }
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
