//! Client session of the in-memory driver.

use super::fail_point::{Command, FailPoints};
use super::store::{DocumentKey, PendingWrite, Store};
use crate::document::{Document, DocumentId, Value};
use crate::driver::{
    DriverError, DriverErrorKind, DriverResult, Session, SessionId, TransactionOptions,
};
use log::{debug, trace};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Client-side transaction state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction was ever started on the session.
    None,
    InProgress,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Server-side view of an open transaction.
#[derive(Debug)]
struct TransactionContext {
    snapshot: u64,
    writes: BTreeMap<DocumentKey, PendingWrite>,
    /// Set when the server gave up on the transaction (write conflict or a
    /// transient failure). Buffered writes are already discarded.
    server_aborted: bool,
}

/// A session on a [`MemoryClient`](super::MemoryClient).
///
/// Data operations run inside the open transaction when there is one, and
/// autocommit otherwise.
#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    store: Arc<Store>,
    fail_points: Arc<FailPoints>,
    state: TransactionState,
    txn: Option<TransactionContext>,
    /// Options given to the most recent `start_transaction`.
    options: Option<TransactionOptions>,
}

impl MemorySession {
    pub(crate) fn new(id: SessionId, store: Arc<Store>, fail_points: Arc<FailPoints>) -> Self {
        Self {
            id,
            store,
            fail_points,
            state: TransactionState::None,
            txn: None,
            options: None,
        }
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.state
    }

    /// Options the most recent transaction was started with, as received.
    pub fn transaction_options(&self) -> Option<&TransactionOptions> {
        self.options.as_ref()
    }

    pub fn insert_one(&mut self, collection: &str, document: Document) -> DriverResult<DocumentId> {
        self.run_command(Command::Insert)?;

        let id = self.store.next_document_id();
        self.write((collection.to_string(), id), PendingWrite::Put(document))?;
        trace!("{} inserted {} into '{}'", self.id, id, collection);

        Ok(id)
    }

    pub fn find_one(&mut self, collection: &str, id: DocumentId) -> DriverResult<Option<Document>> {
        self.run_command(Command::Find)?;
        Ok(self.visible(collection).remove(&id))
    }

    /// Documents whose `field` equals `value`.
    pub fn find_by(
        &mut self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> DriverResult<Vec<(DocumentId, Document)>> {
        self.run_command(Command::Find)?;
        Ok(self
            .visible(collection)
            .into_iter()
            .filter(|(_, doc)| doc.matches(field, value))
            .collect())
    }

    pub fn count(&mut self, collection: &str) -> DriverResult<usize> {
        self.run_command(Command::Find)?;
        Ok(self.visible(collection).len())
    }

    /// Sets the fields of `changes` on a document. Returns false if the
    /// document does not exist.
    pub fn update_one(
        &mut self,
        collection: &str,
        id: DocumentId,
        changes: &Document,
    ) -> DriverResult<bool> {
        self.run_command(Command::Update)?;

        let Some(mut document) = self.visible(collection).remove(&id) else {
            return Ok(false);
        };
        document.merge(changes);
        self.write((collection.to_string(), id), PendingWrite::Put(document))?;

        Ok(true)
    }

    /// Adds `by` to an integer field; a missing field counts as zero.
    pub fn increment(
        &mut self,
        collection: &str,
        id: DocumentId,
        field: &str,
        by: i64,
    ) -> DriverResult<bool> {
        self.run_command(Command::Update)?;

        let Some(mut document) = self.visible(collection).remove(&id) else {
            return Ok(false);
        };
        let current = match document.get(field) {
            None | Some(Value::Null) => 0,
            Some(Value::Int(i)) => *i,
            Some(other) => {
                return Err(DriverError::new(
                    DriverErrorKind::Command,
                    format!(
                        "Cannot increment field '{}' of non-numeric value {}",
                        field, other
                    ),
                ))
            }
        };
        let Some(updated) = current.checked_add(by) else {
            return Err(DriverError::new(
                DriverErrorKind::Command,
                format!(
                    "Failed to apply $inc to field '{}': {} + {} overflows",
                    field, current, by
                ),
            ));
        };
        document.set(field, updated);
        self.write((collection.to_string(), id), PendingWrite::Put(document))?;

        Ok(true)
    }

    /// Returns false if the document does not exist.
    pub fn delete_one(&mut self, collection: &str, id: DocumentId) -> DriverResult<bool> {
        self.run_command(Command::Delete)?;

        if !self.visible(collection).contains_key(&id) {
            return Ok(false);
        }
        self.write((collection.to_string(), id), PendingWrite::Delete)?;

        Ok(true)
    }

    /// Checks fail points and, inside a transaction, that the server still
    /// knows it.
    fn run_command(&mut self, command: Command) -> DriverResult<()> {
        if let Err(err) = self.fail_points.trigger(command) {
            if self.state.is_in_progress() && err.is_transient() {
                self.server_abort();
            }
            return Err(err);
        }

        match &self.txn {
            Some(txn) if self.state.is_in_progress() && txn.server_aborted => {
                Err(DriverError::no_such_transaction(format!(
                    "Transaction on {} has been aborted",
                    self.id
                )))
            }
            _ => Ok(()),
        }
    }

    fn write(&mut self, key: DocumentKey, write: PendingWrite) -> DriverResult<()> {
        let snapshot = match &self.txn {
            Some(txn) if self.state.is_in_progress() => txn.snapshot,
            _ => {
                self.store.apply(self.id, key, write)?;
                return Ok(());
            }
        };

        if let Err(err) = self.store.lock_for_write(self.id, snapshot, &key) {
            debug!("{} hit a write conflict, transaction aborted: {}", self.id, err);
            self.server_abort();
            return Err(err);
        }

        if let Some(txn) = self.txn.as_mut() {
            txn.writes.insert(key, write);
        }
        Ok(())
    }

    /// Committed documents overlaid with this session's uncommitted writes.
    fn visible(&self, collection: &str) -> BTreeMap<DocumentId, Document> {
        let mut documents = self.store.scan(collection);

        if let Some(txn) = self.txn.as_ref().filter(|_| self.state.is_in_progress()) {
            for ((coll, id), write) in &txn.writes {
                if coll != collection {
                    continue;
                }
                match write {
                    PendingWrite::Put(doc) => {
                        documents.insert(*id, doc.clone());
                    }
                    PendingWrite::Delete => {
                        documents.remove(id);
                    }
                }
            }
        }

        documents
    }

    fn server_abort(&mut self) {
        if let Some(txn) = self.txn.as_mut() {
            txn.writes.clear();
            txn.server_aborted = true;
        }
        self.store.release(self.id);
    }

    fn discard(&mut self) {
        self.txn = None;
        self.store.release(self.id);
    }
}

impl Session for MemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn start_transaction(&mut self, options: &TransactionOptions) -> DriverResult<()> {
        if self.state.is_in_progress() {
            return Err(DriverError::new(
                DriverErrorKind::TransactionInProgress,
                "Transaction already in progress",
            ));
        }
        if options
            .write_concern
            .as_ref()
            .is_some_and(|wc| wc.is_unacknowledged())
        {
            return Err(DriverError::new(
                DriverErrorKind::InvalidOptions,
                "Transactions do not support unacknowledged write concern",
            ));
        }
        self.fail_points.trigger(Command::StartTransaction)?;

        self.txn = Some(TransactionContext {
            snapshot: self.store.clock(),
            writes: BTreeMap::new(),
            server_aborted: false,
        });
        self.options = Some(options.clone());
        self.state = TransactionState::InProgress;
        trace!("{} started a transaction", self.id);

        Ok(())
    }

    fn commit_transaction(&mut self) -> DriverResult<()> {
        match self.state {
            TransactionState::None => {
                return Err(DriverError::new(
                    DriverErrorKind::NoTransactionStarted,
                    "No transaction started",
                ))
            }
            TransactionState::Aborted => {
                return Err(DriverError::new(
                    DriverErrorKind::InvalidState,
                    "Cannot call commitTransaction after calling abortTransaction",
                ))
            }
            // Retrying a successful commit is a no-op
            TransactionState::Committed => return Ok(()),
            TransactionState::InProgress => {}
        }

        if let Err(err) = self.fail_points.trigger(Command::Commit) {
            // An unknown outcome keeps the transaction pending so the commit
            // can be retried.
            if !err.is_unknown_commit_result() {
                self.discard();
                self.state = TransactionState::Aborted;
            }
            return Err(err);
        }

        let Some(txn) = self.txn.take() else {
            self.state = TransactionState::Aborted;
            return Err(DriverError::no_such_transaction("Transaction context lost"));
        };
        if txn.server_aborted {
            self.store.release(self.id);
            self.state = TransactionState::Aborted;
            return Err(DriverError::no_such_transaction(format!(
                "Transaction on {} has been aborted",
                self.id
            )));
        }

        let write_count = txn.writes.len();
        let version = self.store.commit(self.id, txn.writes);
        self.state = TransactionState::Committed;
        trace!(
            "{} committed {} writes at clock {}",
            self.id,
            write_count,
            version
        );

        Ok(())
    }

    fn abort_transaction(&mut self) -> DriverResult<()> {
        match self.state {
            TransactionState::None => Err(DriverError::new(
                DriverErrorKind::NoTransactionStarted,
                "No transaction started",
            )),
            TransactionState::Committed => Err(DriverError::new(
                DriverErrorKind::InvalidState,
                "Cannot call abortTransaction after calling commitTransaction",
            )),
            TransactionState::Aborted => Err(DriverError::new(
                DriverErrorKind::InvalidState,
                "Cannot call abortTransaction twice",
            )),
            TransactionState::InProgress => {
                self.discard();
                self.state = TransactionState::Aborted;
                trace!("{} aborted its transaction", self.id);
                Ok(())
            }
        }
    }

    fn is_in_transaction(&self) -> bool {
        self.state.is_in_progress()
    }

    fn end_session(mut self) {
        if self.state.is_in_progress() {
            debug!("{} ended with an open transaction, aborting", self.id);
            self.discard();
            self.state = TransactionState::Aborted;
        }
        trace!("{} ended", self.id);
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.state.is_in_progress() {
            self.discard();
        }
    }
}
