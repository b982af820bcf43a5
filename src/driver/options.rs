//! Transaction options passed through to the driver.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Read concern levels a transaction may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadConcern {
    Local,
    Majority,
    Snapshot,
}

impl std::str::FromStr for ReadConcern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "majority" => Ok(Self::Majority),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(format!("unknown read concern: {}", other)),
        }
    }
}

/// How many nodes must acknowledge a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Acknowledgment {
    Nodes(u32),
    Majority,
}

/// Durability requested for the transaction's commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConcern {
    pub w: Acknowledgment,
    pub journal: Option<bool>,
    pub timeout: Option<Duration>,
}

impl WriteConcern {
    pub fn majority() -> Self {
        Self {
            w: Acknowledgment::Majority,
            journal: None,
            timeout: None,
        }
    }

    pub fn nodes(n: u32) -> Self {
        Self {
            w: Acknowledgment::Nodes(n),
            journal: None,
            timeout: None,
        }
    }

    /// An unacknowledged write concern (`w: 0`).
    pub fn is_unacknowledged(&self) -> bool {
        self.w == Acknowledgment::Nodes(0) && self.journal != Some(true)
    }
}

/// Options for starting a transaction.
///
/// The transaction manager never inspects these; they are handed to the
/// driver's `start_transaction` and retry primitive as given. Missing fields
/// take their defaults when deserialized, so a config file only needs the
/// options it sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionOptions {
    pub read_concern: Option<ReadConcern>,
    pub write_concern: Option<WriteConcern>,
    /// Upper bound the server may spend on the commit command.
    pub max_commit_time: Option<Duration>,
    /// Driver-specific options without a typed field.
    pub extra: BTreeMap<String, String>,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = Some(read_concern);
        self
    }

    pub fn write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = Some(write_concern);
        self
    }

    pub fn max_commit_time(mut self, max_commit_time: Duration) -> Self {
        self.max_commit_time = Some(max_commit_time);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}
