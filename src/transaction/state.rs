//! Transaction manager state.

/// Where a connection's transaction manager currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No current session. `commit` and `rollback` fail.
    NoSession,
    /// A session is current but no transaction is open on it.
    SessionActive,
    /// A transaction is open on the current session.
    InTransaction,
}

impl ManagerState {
    /// Returns true if a transaction is open.
    pub fn is_in_transaction(&self) -> bool {
        matches!(self, Self::InTransaction)
    }
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSession => write!(f, "NoSession"),
            Self::SessionActive => write!(f, "SessionActive"),
            Self::InTransaction => write!(f, "InTransaction"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_state() {
        assert!(!ManagerState::NoSession.is_in_transaction());
        assert!(!ManagerState::SessionActive.is_in_transaction());
        assert!(ManagerState::InTransaction.is_in_transaction());
    }

    #[test]
    fn test_manager_state_display() {
        assert_eq!(format!("{}", ManagerState::NoSession), "NoSession");
        assert_eq!(format!("{}", ManagerState::SessionActive), "SessionActive");
        assert_eq!(format!("{}", ManagerState::InTransaction), "InTransaction");
    }
}
