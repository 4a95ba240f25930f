//! Error types shared by the coordinator and participants

use crate::Xid;
use thiserror::Error;

/// Errors visible across the coordinator/participant boundary
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown, already committed, or already aborted transaction
    #[error("Invalid transaction {xid}: {reason}")]
    InvalidTransaction { xid: Xid, reason: String },

    /// The transaction was forced to abort; callers must treat it as dead
    #[error("Transaction {xid} aborted: {reason}")]
    TransactionAborted { xid: Xid, reason: String },

    /// The lock manager chose this transaction as a deadlock victim
    #[error("Deadlock: transaction {xid} waiting for {resource}")]
    Deadlock { xid: Xid, resource: String },

    /// A remote call could not reach its target
    #[error("{target} unavailable: {reason}")]
    Unavailable { target: String, reason: String },

    /// State could not be persisted
    #[error("Durability failure: {0}")]
    Durability(String),

    /// Persisted state is inconsistent or undecodable
    #[error("Corrupted state: {0}")]
    Corrupted(String),

    /// Request is malformed (bad table name and similar)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The component died at a fault-injection point
    #[error("{component} crashed at {point}")]
    Crashed { component: String, point: String },
}

impl Error {
    pub fn invalid_transaction(xid: Xid, reason: impl Into<String>) -> Self {
        Error::InvalidTransaction {
            xid,
            reason: reason.into(),
        }
    }

    pub fn aborted(xid: Xid, reason: impl Into<String>) -> Self {
        Error::TransactionAborted {
            xid,
            reason: reason.into(),
        }
    }

    pub fn unavailable(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Unavailable {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// A peer that died mid-call looks the same as one that could not be reached
    pub fn is_communication_failure(&self) -> bool {
        matches!(self, Error::Unavailable { .. } | Error::Crashed { .. })
    }
}

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, Error>;
