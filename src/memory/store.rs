//! Shared document storage behind the in-memory driver.

use crate::document::{Document, DocumentId};
use crate::driver::{DriverError, DriverResult, SessionId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Key of a single document: collection name and id.
pub type DocumentKey = (String, DocumentId);

/// A write buffered by a transaction, or applied directly by an autocommit
/// operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Put(Document),
    Delete,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    document: Document,
    /// Commit clock value of the write that produced this document.
    version: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    collections: HashMap<String, BTreeMap<DocumentId, StoredDocument>>,
    /// Commit clock, bumped once per applied commit.
    clock: u64,
    /// Documents with uncommitted transactional writes, and who holds them.
    locks: HashMap<DocumentKey, SessionId>,
}

/// Committed documents plus the write locks of in-flight transactions.
#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<StoreInner>,
    next_document_id: AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current commit clock. Transactions record it as their snapshot.
    pub fn clock(&self) -> u64 {
        self.inner.read().clock
    }

    pub fn next_document_id(&self) -> DocumentId {
        DocumentId::new(self.next_document_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Committed version of a document.
    pub fn get(&self, collection: &str, id: DocumentId) -> Option<Document> {
        let inner = self.inner.read();
        inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(&id))
            .map(|stored| stored.document.clone())
    }

    /// All committed documents of a collection, ordered by id.
    pub fn scan(&self, collection: &str) -> BTreeMap<DocumentId, Document> {
        let inner = self.inner.read();
        inner
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, stored)| (*id, stored.document.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self, collection: &str) -> usize {
        let inner = self.inner.read();
        inner.collections.get(collection).map_or(0, BTreeMap::len)
    }

    /// Takes the write lock on a document for a transaction that started at
    /// `snapshot`.
    ///
    /// Fails with a transient write conflict if another session holds the
    /// lock, or if the document was committed after the snapshot.
    pub fn lock_for_write(
        &self,
        owner: SessionId,
        snapshot: u64,
        key: &DocumentKey,
    ) -> DriverResult<()> {
        let mut inner = self.inner.write();

        if let Some(holder) = inner.locks.get(key) {
            if *holder != owner {
                return Err(DriverError::write_conflict(format!(
                    "Document {} in '{}' is being written by {}",
                    key.1, key.0, holder
                )));
            }
            return Ok(());
        }

        let version = inner
            .collections
            .get(&key.0)
            .and_then(|docs| docs.get(&key.1))
            .map(|stored| stored.version);
        if let Some(version) = version {
            if version > snapshot {
                return Err(DriverError::write_conflict(format!(
                    "Document {} in '{}' changed after the transaction started",
                    key.1, key.0
                )));
            }
        }

        inner.locks.insert(key.clone(), owner);
        Ok(())
    }

    /// Atomically applies a transaction's writes and releases its locks.
    /// Returns the commit clock value.
    pub fn commit(&self, owner: SessionId, writes: BTreeMap<DocumentKey, PendingWrite>) -> u64 {
        let mut inner = self.inner.write();
        inner.clock += 1;
        let version = inner.clock;

        for (key, write) in writes {
            Self::apply_locked(&mut inner, key, write, version);
        }
        inner.locks.retain(|_, holder| *holder != owner);

        version
    }

    /// Applies a single write outside any transaction.
    pub fn apply(&self, owner: SessionId, key: DocumentKey, write: PendingWrite) -> DriverResult<u64> {
        let mut inner = self.inner.write();

        if let Some(holder) = inner.locks.get(&key) {
            if *holder != owner {
                return Err(DriverError::write_conflict(format!(
                    "Document {} in '{}' is being written by {}",
                    key.1, key.0, holder
                )));
            }
        }

        inner.clock += 1;
        let version = inner.clock;
        Self::apply_locked(&mut inner, key, write, version);
        Ok(version)
    }

    /// Drops every lock held by `owner`.
    pub fn release(&self, owner: SessionId) {
        self.inner.write().locks.retain(|_, holder| *holder != owner);
    }

    /// Number of document locks currently held.
    pub fn lock_count(&self) -> usize {
        self.inner.read().locks.len()
    }

    /// Removes every committed document of a collection.
    pub fn truncate(&self, collection: &str) {
        let mut inner = self.inner.write();
        inner.clock += 1;
        inner.collections.remove(collection);
    }

    fn apply_locked(inner: &mut StoreInner, key: DocumentKey, write: PendingWrite, version: u64) {
        let (collection, id) = key;
        match write {
            PendingWrite::Put(document) => {
                inner
                    .collections
                    .entry(collection)
                    .or_default()
                    .insert(id, StoredDocument { document, version });
            }
            PendingWrite::Delete => {
                if let Some(docs) = inner.collections.get_mut(&collection) {
                    docs.remove(&id);
                }
            }
        }
    }
}
