//! In-memory reference driver.
//!
//! Implements the driver boundary with MongoDB-like session semantics so the
//! transaction manager can be exercised without a server:
//!
//! - **MemoryClient**: connection handle, session factory and retry loop
//! - **MemorySession**: client session with per-transaction write buffering
//! - **Store**: committed documents, commit clock and document write locks
//! - **FailPoint**: forces the next invocations of a command to fail
//!
//! Reads are read-committed plus the session's own writes. Two transactions
//! writing the same document conflict; the later writer gets a transient
//! write conflict and its transaction is aborted.

pub mod client;
pub mod fail_point;
pub mod retry;
pub mod session;
pub mod store;

pub use client::MemoryClient;
pub use fail_point::{Command, FailPoint};
pub use session::{MemorySession, TransactionState};
pub use store::Store;
