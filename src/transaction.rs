//! Transaction management module.
//!
//! This module provides the session-scoped transaction manager:
//! - Session lifecycle (acquire on begin, end on commit/rollback)
//! - Begin, commit, rollback forwarded to the driver session
//! - Run-in-transaction with a bounded number of callback attempts
//! - Nested transactions rejected by the driver, surfaced as errors

pub mod error;
pub mod manager;
pub mod state;

// Re-export commonly used types
pub use error::{Result, TransactionError};
pub use manager::TransactionManager;
pub use state::ManagerState;
