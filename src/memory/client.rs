//! Client handle of the in-memory driver.

use super::fail_point::{Command, FailPoint, FailPoints};
use super::retry::{self, DEFAULT_RETRY_TIME_LIMIT};
use super::session::MemorySession;
use super::store::{PendingWrite, Store};
use crate::document::{Document, DocumentId, Value};
use crate::driver::{
    Connection, DriverResult, Session, SessionId, SessionIdGenerator, TransactionBody,
    TransactionOptions,
};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// A connection to an in-memory document store.
///
/// Clones share the same store, fail points and session id sequence, so two
/// clones behave like two connections to the same server.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    store: Arc<Store>,
    fail_points: Arc<FailPoints>,
    session_ids: Arc<SessionIdGenerator>,
    retry_time_limit: Duration,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Store::new()),
            fail_points: Arc::new(FailPoints::new()),
            session_ids: Arc::new(SessionIdGenerator::new()),
            retry_time_limit: DEFAULT_RETRY_TIME_LIMIT,
        }
    }

    /// Sets how long `run_with_retry` keeps retrying transient failures.
    pub fn with_retry_time_limit(mut self, limit: Duration) -> Self {
        self.retry_time_limit = limit;
        self
    }

    pub fn retry_time_limit(&self) -> Duration {
        self.retry_time_limit
    }

    /// Registers a fail point shared by every session of this client.
    pub fn fail_command(&self, fail_point: FailPoint) {
        debug!(
            "Fail point set: {:?} x{} -> {}",
            fail_point.command, fail_point.times, fail_point.error
        );
        self.fail_points.add(fail_point);
    }

    pub fn clear_fail_points(&self) {
        self.fail_points.clear();
    }

    /// Failures still pending for `command`.
    pub fn pending_failures(&self, command: Command) -> u32 {
        self.fail_points.remaining(command)
    }

    /// Inserts a document outside any transaction.
    pub fn insert_one(&self, collection: &str, document: Document) -> DriverResult<DocumentId> {
        let id = self.store.next_document_id();
        self.store.apply(
            SessionId::IMPLICIT,
            (collection.to_string(), id),
            PendingWrite::Put(document),
        )?;
        Ok(id)
    }

    /// Reads the committed version of a document.
    pub fn find_one(&self, collection: &str, id: DocumentId) -> Option<Document> {
        self.store.get(collection, id)
    }

    /// Committed documents whose `field` equals `value`.
    pub fn find_by(&self, collection: &str, field: &str, value: &Value) -> Vec<(DocumentId, Document)> {
        self.store
            .scan(collection)
            .into_iter()
            .filter(|(_, doc)| doc.matches(field, value))
            .collect()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.store.count(collection)
    }

    pub fn truncate(&self, collection: &str) {
        self.store.truncate(collection);
    }

    /// Number of documents currently locked by open transactions.
    pub fn locked_documents(&self) -> usize {
        self.store.lock_count()
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for MemoryClient {
    type Session = MemorySession;

    fn start_session(&self) -> DriverResult<MemorySession> {
        self.fail_points.trigger(Command::StartSession)?;

        let session = MemorySession::new(
            self.session_ids.next(),
            Arc::clone(&self.store),
            Arc::clone(&self.fail_points),
        );
        debug!("Started {}", session.id());
        Ok(session)
    }

    fn run_with_retry(
        &self,
        session: &mut MemorySession,
        body: &mut TransactionBody<'_, MemorySession>,
        options: &TransactionOptions,
    ) -> DriverResult<()> {
        retry::run_with_retry(session, body, options, self.retry_time_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverError, DriverErrorKind};

    #[test]
    fn test_sessions_get_distinct_ids() -> DriverResult<()> {
        let client = MemoryClient::new();
        let a = client.start_session()?;
        let b = client.clone().start_session()?;

        assert_ne!(a.id(), b.id());
        assert!(!a.id().is_implicit());
        Ok(())
    }

    #[test]
    fn test_clones_share_the_store() -> DriverResult<()> {
        let client = MemoryClient::new();
        let other = client.clone();

        let id = client.insert_one("users", Document::new().with("name", "klinson"))?;

        assert_eq!(other.count("users"), 1);
        assert!(other.find_one("users", id).is_some());
        assert_eq!(
            other.find_by("users", "name", &Value::from("klinson")).len(),
            1
        );

        other.truncate("users");
        assert_eq!(client.count("users"), 0);
        Ok(())
    }

    #[test]
    fn test_start_session_fail_point() {
        let client = MemoryClient::new();
        client.fail_command(FailPoint::new(
            Command::StartSession,
            1,
            DriverError::new(DriverErrorKind::Network, "no reachable servers"),
        ));

        assert_eq!(client.pending_failures(Command::StartSession), 1);
        let err = client.start_session().unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Network);
        assert!(client.start_session().is_ok());
    }

    #[test]
    fn test_retry_time_limit_config() {
        let client = MemoryClient::new();
        assert_eq!(client.retry_time_limit(), DEFAULT_RETRY_TIME_LIMIT);

        let client = client.with_retry_time_limit(Duration::from_secs(1));
        assert_eq!(client.retry_time_limit(), Duration::from_secs(1));
    }
}
