//! Transaction manager for a single connection.

use log::{debug, warn};

use super::error::{Result, TransactionError};
use super::state::ManagerState;
use crate::driver::{Connection, DriverResult, Session, TransactionOptions};

/// Forwards begin/commit/rollback to the current driver session and runs
/// callbacks in driver-retried transactions.
///
/// Holds at most one current session. The session is acquired lazily by
/// `begin_transaction` or `transaction` and ended by `commit` or `rollback`,
/// so an ended session is never reused. Nesting is not tracked here: the
/// driver rejects starting a second transaction on the same session.
pub struct TransactionManager<C: Connection> {
    connection: C,
    /// The current session, if any.
    session: Option<C::Session>,
}

impl<C: Connection> TransactionManager<C> {
    /// Creates a manager with no current session.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            session: None,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Returns the current session, if one exists.
    pub fn session(&self) -> Option<&C::Session> {
        self.session.as_ref()
    }

    /// Mutable access to the current session, for running operations inside
    /// a transaction opened with `begin_transaction`.
    pub fn session_mut(&mut self) -> Option<&mut C::Session> {
        self.session.as_mut()
    }

    pub fn state(&self) -> ManagerState {
        match &self.session {
            None => ManagerState::NoSession,
            Some(session) if session.is_in_transaction() => ManagerState::InTransaction,
            Some(_) => ManagerState::SessionActive,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.state().is_in_transaction()
    }

    /// Starts a transaction on the current session, acquiring a session
    /// first if there is none.
    ///
    /// Fails with [`TransactionError::NestedTransaction`] if a transaction is
    /// already open; the open transaction is left as it was.
    pub fn begin_transaction(&mut self, options: &TransactionOptions) -> Result<()> {
        let session = Self::acquire(&self.connection, &mut self.session)?;

        if let Err(err) = session.start_transaction(options) {
            debug!("{} refused to start a transaction: {}", session.id(), err);
            return Err(err.into());
        }

        debug!("Began transaction on {}", session.id());
        Ok(())
    }

    /// Commits the current transaction and ends its session.
    ///
    /// The slot is cleared before the commit is sent, so even a failed commit
    /// leaves the manager without a session.
    pub fn commit(&mut self) -> Result<()> {
        let mut session = self.session.take().ok_or(TransactionError::NoActiveSession)?;
        let id = session.id();

        let result = session.commit_transaction();
        session.end_session();

        match result {
            Ok(()) => {
                debug!("Committed transaction on {}", id);
                Ok(())
            }
            Err(err) => {
                warn!("Commit failed on {}: {}", id, err);
                Err(err.into())
            }
        }
    }

    /// Aborts the current transaction and ends its session.
    ///
    /// `to_level` exists for parity with savepoint-based managers and is
    /// ignored.
    pub fn rollback(&mut self, to_level: Option<u32>) -> Result<()> {
        let mut session = self.session.take().ok_or(TransactionError::NoActiveSession)?;
        let id = session.id();

        if let Some(level) = to_level {
            debug!("Ignoring rollback level {} on {}", level, id);
        }

        let result = session.abort_transaction();
        session.end_session();

        match result {
            Ok(()) => {
                debug!("Rolled back transaction on {}", id);
                Ok(())
            }
            Err(err) => {
                warn!("Rollback failed on {}: {}", id, err);
                Err(err.into())
            }
        }
    }

    /// Runs `callback` in a transaction through the driver's retry loop.
    ///
    /// `callback` is invoked at most `attempts` times; once the budget is
    /// spent, the next attempt the driver makes is aborted without calling
    /// it. Returns the value of the last successful invocation, or `None`
    /// if the budget ran out first (always the case for `attempts == 0`).
    ///
    /// `Some` does not mean the transaction committed: if the callback
    /// succeeded but the commit failed transiently and the budget ran out
    /// on the retry, its value is still returned and nothing was written.
    ///
    /// A session acquired by this call is ended before returning. If a
    /// session was already current, it stays current.
    pub fn transaction<T, F>(
        &mut self,
        mut callback: F,
        attempts: u32,
        options: &TransactionOptions,
    ) -> Result<Option<T>>
    where
        F: FnMut(&mut C::Session) -> DriverResult<T>,
    {
        let acquired = self.session.is_none();
        let session = Self::acquire(&self.connection, &mut self.session)?;
        let id = session.id();

        let mut attempts_left = i64::from(attempts);
        let mut result = None;

        let outcome = {
            let mut body = |session: &mut C::Session| -> DriverResult<()> {
                attempts_left -= 1;
                if attempts_left < 0 {
                    debug!(
                        "Attempt budget of {} spent on {}, aborting",
                        attempts,
                        session.id()
                    );
                    return session.abort_transaction();
                }

                result = Some(callback(session)?);
                Ok(())
            };
            self.connection.run_with_retry(session, &mut body, options)
        };

        if acquired {
            if let Some(session) = self.session.take() {
                session.end_session();
            }
        }

        match outcome {
            Ok(()) => {
                debug!(
                    "Transaction on {} finished ({})",
                    id,
                    if result.is_some() { "committed" } else { "no result" }
                );
                Ok(result)
            }
            Err(err) => {
                debug!("Transaction on {} failed: {}", id, err);
                Err(err.into())
            }
        }
    }

    /// Returns the current session, starting one if needed.
    fn acquire<'a>(
        connection: &C,
        slot: &'a mut Option<C::Session>,
    ) -> DriverResult<&'a mut C::Session> {
        let session = match slot.take() {
            Some(session) => session,
            None => {
                let session = connection.start_session()?;
                debug!("Acquired {}", session.id());
                session
            }
        };
        Ok(slot.insert(session))
    }
}

impl<C: Connection> Drop for TransactionManager<C> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.is_in_transaction() {
                // Best effort abort
                if let Err(err) = session.abort_transaction() {
                    warn!("Failed to abort transaction on {} at drop: {}", session.id(), err);
                }
            }
            session.end_session();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::driver::{DriverError, DriverErrorKind, ReadConcern, WriteConcern};
    use crate::memory::{Command, FailPoint, MemoryClient};
    use std::time::Duration;

    fn manager() -> TransactionManager<MemoryClient> {
        TransactionManager::new(MemoryClient::new())
    }

    #[test]
    fn test_commit_without_session() {
        let mut manager = manager();
        assert_eq!(manager.commit(), Err(TransactionError::NoActiveSession));
    }

    #[test]
    fn test_rollback_without_session() {
        let mut manager = manager();
        assert_eq!(manager.rollback(None), Err(TransactionError::NoActiveSession));
    }

    #[test]
    fn test_rollback_after_commit() -> Result<()> {
        let mut manager = manager();

        manager.begin_transaction(&TransactionOptions::default())?;
        manager.commit()?;

        assert_eq!(manager.state(), ManagerState::NoSession);
        assert_eq!(manager.rollback(None), Err(TransactionError::NoActiveSession));
        Ok(())
    }

    #[test]
    fn test_state_transitions() -> Result<()> {
        let mut manager = manager();
        assert_eq!(manager.state(), ManagerState::NoSession);

        manager.begin_transaction(&TransactionOptions::default())?;
        assert_eq!(manager.state(), ManagerState::InTransaction);
        assert!(manager.in_transaction());

        manager.rollback(None)?;
        assert_eq!(manager.state(), ManagerState::NoSession);
        assert!(manager.session().is_none());
        Ok(())
    }

    #[test]
    fn test_nested_begin_is_rejected() -> Result<()> {
        let mut manager = manager();

        manager.begin_transaction(&TransactionOptions::default())?;
        let first = manager.session().map(|s| s.id());

        let err = manager
            .begin_transaction(&TransactionOptions::default())
            .unwrap_err();
        assert!(matches!(err, TransactionError::NestedTransaction(_)));
        assert_eq!(
            err.driver_error().map(|e| e.kind),
            Some(DriverErrorKind::TransactionInProgress)
        );

        // The first transaction is unaffected
        assert_eq!(manager.session().map(|s| s.id()), first);
        assert!(manager.in_transaction());
        manager.rollback(None)?;
        Ok(())
    }

    #[test]
    fn test_session_is_stable_until_slot_changes() -> Result<()> {
        let mut manager = manager();
        manager.begin_transaction(&TransactionOptions::default())?;

        let a = manager.session().map(|s| s.id());
        let b = manager.session().map(|s| s.id());
        assert!(a.is_some());
        assert_eq!(a, b);
        assert!(std::ptr::eq(
            manager.session().unwrap(),
            manager.session().unwrap()
        ));

        manager.commit()?;
        manager.begin_transaction(&TransactionOptions::default())?;
        assert_ne!(manager.session().map(|s| s.id()), a);
        Ok(())
    }

    #[test]
    fn test_rollback_ignores_level() -> Result<()> {
        let mut manager = manager();
        manager.begin_transaction(&TransactionOptions::default())?;
        let session = manager.session_mut().expect("session is current");
        session.insert_one("users", Document::new())?;

        manager.rollback(Some(3))?;
        assert_eq!(manager.connection().count("users"), 0);
        Ok(())
    }

    #[test]
    fn test_options_reach_the_driver() -> Result<()> {
        let mut manager = manager();
        let options = TransactionOptions::new()
            .read_concern(ReadConcern::Snapshot)
            .write_concern(WriteConcern::majority())
            .max_commit_time(Duration::from_secs(2))
            .extra("comment", "audit");

        manager.begin_transaction(&options)?;
        assert_eq!(
            manager.session().and_then(|s| s.transaction_options()),
            Some(&options)
        );
        manager.commit()?;
        Ok(())
    }

    #[test]
    fn test_begin_error_other_than_nesting() {
        let mut manager = manager();
        let options = TransactionOptions::new().write_concern(WriteConcern::nodes(0));

        let err = manager.begin_transaction(&options).unwrap_err();
        assert_eq!(
            err.driver_error().map(|e| e.kind),
            Some(DriverErrorKind::InvalidOptions)
        );
        assert!(matches!(err, TransactionError::Driver(_)));
        // The session stays current without a transaction
        assert_eq!(manager.state(), ManagerState::SessionActive);
    }

    #[test]
    fn test_failed_commit_clears_slot() -> Result<()> {
        let mut manager = manager();
        manager.connection().fail_command(FailPoint::new(
            Command::Commit,
            1,
            DriverError::new(DriverErrorKind::Network, "connection reset"),
        ));

        manager.begin_transaction(&TransactionOptions::default())?;
        let err = manager.commit().unwrap_err();
        assert!(matches!(err, TransactionError::Driver(_)));
        assert_eq!(manager.state(), ManagerState::NoSession);
        assert_eq!(manager.rollback(None), Err(TransactionError::NoActiveSession));
        Ok(())
    }

    #[test]
    fn test_session_start_failure() {
        let mut manager = manager();
        manager.connection().fail_command(FailPoint::new(
            Command::StartSession,
            1,
            DriverError::new(DriverErrorKind::Network, "no reachable servers"),
        ));

        let err = manager
            .begin_transaction(&TransactionOptions::default())
            .unwrap_err();
        assert!(matches!(err, TransactionError::Driver(_)));
        assert_eq!(manager.state(), ManagerState::NoSession);
    }

    #[test]
    fn test_transaction_zero_attempts() -> Result<()> {
        let mut manager = manager();
        let mut calls = 0;

        let result = manager.transaction(
            |session| {
                calls += 1;
                session.insert_one("users", Document::new())
            },
            0,
            &TransactionOptions::default(),
        )?;

        assert!(result.is_none());
        assert_eq!(calls, 0);
        assert_eq!(manager.connection().count("users"), 0);
        Ok(())
    }

    #[test]
    fn test_transaction_returns_callback_value() -> Result<()> {
        let mut manager = manager();

        let result = manager.transaction(
            |session| session.insert_one("users", Document::new().with("title", "admin")),
            1,
            &TransactionOptions::default(),
        )?;

        let id = result.expect("callback result");
        let doc = manager.connection().find_one("users", id).expect("committed");
        assert_eq!(doc.get("title").and_then(|v| v.as_str()), Some("admin"));
        // The session acquired for the call is gone
        assert_eq!(manager.state(), ManagerState::NoSession);
        Ok(())
    }

    #[test]
    fn test_transaction_retries_within_budget() -> Result<()> {
        let mut manager = manager();
        manager.connection().fail_command(FailPoint::new(
            Command::Insert,
            1,
            DriverError::write_conflict("conflict"),
        ));

        let mut calls = 0;
        let result = manager.transaction(
            |session| {
                calls += 1;
                session.insert_one("users", Document::new())
            },
            2,
            &TransactionOptions::default(),
        )?;

        assert!(result.is_some());
        assert_eq!(calls, 2);
        assert_eq!(manager.connection().count("users"), 1);
        Ok(())
    }

    #[test]
    fn test_transaction_budget_exhausted() -> Result<()> {
        let mut manager = manager();
        manager.connection().fail_command(FailPoint::new(
            Command::Insert,
            5,
            DriverError::write_conflict("conflict"),
        ));

        let mut calls = 0;
        let result = manager.transaction(
            |session| {
                calls += 1;
                session.insert_one("users", Document::new())
            },
            3,
            &TransactionOptions::default(),
        )?;

        assert!(result.is_none());
        assert_eq!(calls, 3);
        assert_eq!(manager.connection().count("users"), 0);
        assert_eq!(manager.connection().pending_failures(Command::Insert), 2);
        Ok(())
    }

    #[test]
    fn test_transaction_keeps_value_when_commit_retry_is_out_of_budget() -> Result<()> {
        let mut manager = manager();
        manager.connection().fail_command(FailPoint::new(
            Command::Commit,
            1,
            DriverError::no_such_transaction("primary stepped down"),
        ));

        let mut calls = 0;
        let result = manager.transaction(
            |session| {
                calls += 1;
                session.insert_one("users", Document::new())
            },
            1,
            &TransactionOptions::default(),
        )?;

        assert!(result.is_some());
        assert_eq!(calls, 1);
        assert_eq!(manager.connection().count("users"), 0);
        assert_eq!(manager.state(), ManagerState::NoSession);
        Ok(())
    }

    #[test]
    fn test_transaction_non_transient_error() {
        let mut manager = manager();

        let err = manager
            .transaction(
                |session| -> DriverResult<()> {
                    session.insert_one("users", Document::new())?;
                    Err(DriverError::application("invalid user"))
                },
                3,
                &TransactionOptions::default(),
            )
            .unwrap_err();

        assert_eq!(
            err,
            TransactionError::Driver(DriverError::application("invalid user"))
        );
        assert_eq!(manager.connection().count("users"), 0);
        assert_eq!(manager.state(), ManagerState::NoSession);
    }

    #[test]
    fn test_transaction_inside_manual_transaction() -> Result<()> {
        let mut manager = manager();
        manager.begin_transaction(&TransactionOptions::default())?;
        let id = manager.session().map(|s| s.id());

        let mut calls = 0;
        let err = manager
            .transaction(
                |_| {
                    calls += 1;
                    Ok(())
                },
                1,
                &TransactionOptions::default(),
            )
            .unwrap_err();

        assert!(matches!(err, TransactionError::NestedTransaction(_)));
        assert_eq!(calls, 0);
        // The manual transaction and its session remain current
        assert_eq!(manager.session().map(|s| s.id()), id);
        assert!(manager.in_transaction());
        manager.rollback(None)?;
        Ok(())
    }

    #[test]
    fn test_drop_aborts_open_transaction() -> Result<()> {
        let client = MemoryClient::new();
        {
            let mut manager = TransactionManager::new(client.clone());
            manager.begin_transaction(&TransactionOptions::default())?;
            if let Some(session) = manager.session_mut() {
                session.insert_one("users", Document::new())?;
            }
            assert_eq!(client.locked_documents(), 1);
        }

        assert_eq!(client.count("users"), 0);
        assert_eq!(client.locked_documents(), 0);
        Ok(())
    }
}
