//! Coordinator-side transaction status

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction status as recorded by the coordinator
///
/// `Initiated -> Preparing -> Committed`, or `Initiated | Preparing -> Aborted`.
/// Nothing leaves `Committed` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Started, accepting operations and enlistments
    Initiated,
    /// Phase 1 in progress
    Preparing,
    /// Decision made: commit
    Committed,
    /// Decision made: abort
    Aborted,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::Aborted)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Initiated => "INITIATED",
            TransactionStatus::Preparing => "PREPARING",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}
