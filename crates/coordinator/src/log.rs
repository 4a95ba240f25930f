//! Durable coordinator state
//!
//! Two whole-object snapshots: the last transaction id handed out
//! (`xid_counter.log`) and the status map (`transactions.log`). The map keeps,
//! per transaction, its status and the participants that have not yet
//! confirmed the decision.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use travel_common::{Error, Result, TransactionStatus, Xid};
use travel_snapshot::{SnapshotError, SnapshotStore};

const COUNTER_FILE: &str = "xid_counter.log";
const TRANSACTIONS_FILE: &str = "transactions.log";
const COUNTER_KIND: &str = "xid-counter";
const TRANSACTIONS_KIND: &str = "transactions";

/// Transaction metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub status: TransactionStatus,
    /// Enlisted participants still owed the decision
    pub participants: BTreeSet<String>,
}

impl TransactionRecord {
    pub fn new() -> Self {
        Self {
            status: TransactionStatus::Initiated,
            participants: BTreeSet::new(),
        }
    }
}

impl Default for TransactionRecord {
    fn default() -> Self {
        Self::new()
    }
}

pub type TransactionMap = BTreeMap<Xid, TransactionRecord>;

/// Persistence for the coordinator
#[derive(Debug, Clone)]
pub struct TransactionLog {
    store: SnapshotStore,
}

impl TransactionLog {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let store = SnapshotStore::new(data_dir).map_err(durability)?;
        Ok(Self { store })
    }

    /// Last id handed out, zero for a fresh log
    pub fn load_counter(&self) -> Result<Xid> {
        Ok(self
            .store
            .load(COUNTER_FILE, COUNTER_KIND)
            .map_err(corrupted)?
            .unwrap_or(Xid::new(0)))
    }

    pub fn store_counter(&self, last: Xid) -> Result<()> {
        self.store
            .store(COUNTER_FILE, COUNTER_KIND, &last)
            .map_err(durability)
    }

    pub fn load_transactions(&self) -> Result<TransactionMap> {
        Ok(self
            .store
            .load(TRANSACTIONS_FILE, TRANSACTIONS_KIND)
            .map_err(corrupted)?
            .unwrap_or_default())
    }

    pub fn store_transactions(&self, transactions: &TransactionMap) -> Result<()> {
        self.store
            .store(TRANSACTIONS_FILE, TRANSACTIONS_KIND, transactions)
            .map_err(durability)
    }
}

fn durability(e: SnapshotError) -> Error {
    Error::Durability(e.to_string())
}

fn corrupted(e: SnapshotError) -> Error {
    match e {
        SnapshotError::Io { .. } => Error::Durability(e.to_string()),
        other => Error::Corrupted(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_log() {
        let dir = TempDir::new().unwrap();
        let log = TransactionLog::open(dir.path()).unwrap();

        assert_eq!(log.load_counter().unwrap(), Xid::new(0));
        assert!(log.load_transactions().unwrap().is_empty());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let log = TransactionLog::open(dir.path()).unwrap();

        let mut record = TransactionRecord::new();
        record.status = TransactionStatus::Committed;
        record.participants.insert("rm.flights".to_string());
        let transactions = TransactionMap::from([(Xid::new(3), record.clone())]);

        log.store_counter(Xid::new(3)).unwrap();
        log.store_transactions(&transactions).unwrap();

        let reopened = TransactionLog::open(dir.path()).unwrap();
        assert_eq!(reopened.load_counter().unwrap(), Xid::new(3));
        assert_eq!(reopened.load_transactions().unwrap()[&Xid::new(3)], record);
        assert!(dir.path().join("xid_counter.log").is_file());
        assert!(dir.path().join("transactions.log").is_file());
    }

    #[test]
    fn test_truncated_log_is_corruption() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("transactions.log"), [0xa3, 0x01]).unwrap();
        let log = TransactionLog::open(dir.path()).unwrap();

        assert!(matches!(log.load_transactions(), Err(Error::Corrupted(_))));
    }
}
