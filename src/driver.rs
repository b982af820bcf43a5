//! Boundary to the storage driver.
//!
//! The transaction manager only talks to the driver through these traits:
//!
//! - **Connection**: hands out sessions and owns the driver's retrying
//!   with-transaction primitive
//! - **Session**: start/commit/abort a transaction, end the session
//!
//! Transaction protocol, retry classification and nesting rejection all live
//! behind this boundary.

pub mod error;
pub mod id;
pub mod options;

pub use error::{
    codes, DriverError, DriverErrorKind, DriverResult, TRANSIENT_TRANSACTION_ERROR,
    UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
pub use id::{SessionId, SessionIdGenerator};
pub use options::{Acknowledgment, ReadConcern, TransactionOptions, WriteConcern};

/// Callback run by [`Connection::run_with_retry`] once per attempt.
pub type TransactionBody<'a, S> = dyn FnMut(&mut S) -> DriverResult<()> + 'a;

/// A driver-level session capable of multi-document transactions.
pub trait Session {
    fn id(&self) -> SessionId;

    /// Starts a transaction. Fails if one is already in progress.
    fn start_transaction(&mut self, options: &TransactionOptions) -> DriverResult<()>;

    fn commit_transaction(&mut self) -> DriverResult<()>;

    fn abort_transaction(&mut self) -> DriverResult<()>;

    /// True while a started transaction has been neither committed nor aborted.
    fn is_in_transaction(&self) -> bool;

    /// Ends the session. The handle is consumed and cannot be reused.
    fn end_session(self)
    where
        Self: Sized;
}

/// A connection to the storage engine.
pub trait Connection {
    type Session: Session;

    /// Returns a new session that is not yet in a transaction.
    fn start_session(&self) -> DriverResult<Self::Session>;

    /// Runs `body` inside a transaction on `session`, retrying according to
    /// the driver's own transient-error classification, and commits.
    ///
    /// If `body` returns `Ok` after ending the transaction itself, the driver
    /// returns without committing.
    fn run_with_retry(
        &self,
        session: &mut Self::Session,
        body: &mut TransactionBody<'_, Self::Session>,
        options: &TransactionOptions,
    ) -> DriverResult<()>;
}
