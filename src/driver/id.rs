//! Logical session ids.
//!
//! Every write lock and buffered write in a store is owned by a session id.
//! Id 0 is reserved for writes that run outside any explicit session
//! (autocommit through the client), so explicit sessions count up from 1.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a driver session for its whole lifetime. Ids are not reused
/// after the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Owner of writes issued without an explicit session.
    pub const IMPLICIT: SessionId = SessionId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_implicit(&self) -> bool {
        *self == Self::IMPLICIT
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_implicit() {
            write!(f, "ImplicitSession")
        } else {
            write!(f, "Session{}", self.0)
        }
    }
}

/// Hands out ids for explicit sessions; shared by all clones of a client.
#[derive(Debug)]
pub struct SessionIdGenerator {
    next_id: AtomicU64,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(SessionId::IMPLICIT.0 + 1),
        }
    }

    /// Never returns [`SessionId::IMPLICIT`].
    pub fn next(&self) -> SessionId {
        SessionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
