//! Transaction identifier handed out by the coordinator
//!
//! Ids come from a durable counter, so they are unique for the lifetime of the
//! coordinator's log and increase monotonically. A smaller id is an older transaction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Xid(u64);

impl Xid {
    /// The first id a fresh coordinator hands out
    pub const FIRST: Xid = Xid(1);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Zero never names a transaction
    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }

    /// The id following this one
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Older transactions have smaller ids
    pub fn is_older_than(&self, other: &Xid) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Xid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(Xid)
            .map_err(|e| format!("Invalid transaction id '{}': {}", s, e))
    }
}

impl From<u64> for Xid {
    fn from(raw: u64) -> Self {
        Xid(raw)
    }
}
