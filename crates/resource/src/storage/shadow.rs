//! Transaction-private overlay of a main table
//!
//! A shadow table holds every record its transaction wrote, plus the lock
//! mode last taken on every key it touched. Reads fall through to the parent
//! main table and hand back a copy, so nothing the transaction does can reach
//! the parent before commit merges the overlay.

use super::Table;
use crate::types::Record;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use travel_common::Xid;
use travel_lock::{LockError, LockKey, LockManager, LockMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "R: Record")]
pub struct ShadowTable<R> {
    table: String,
    xid: Xid,
    records: BTreeMap<String, R>,
    /// Strongest lock mode taken per key
    locks: BTreeMap<String, LockMode>,
}

impl<R: Record> ShadowTable<R> {
    pub fn new(table: impl Into<String>, xid: Xid) -> Self {
        Self {
            table: table.into(),
            xid,
            records: BTreeMap::new(),
            locks: BTreeMap::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn xid(&self) -> Xid {
        self.xid
    }

    /// Local record if written, otherwise a copy of the parent's
    pub fn get(&self, key: &str, parent: &Table<R>) -> Option<R> {
        self.records
            .get(key)
            .or_else(|| parent.get(key))
            .cloned()
    }

    /// Visible keys: everything written locally plus everything in the parent
    pub fn keys(&self, parent: &Table<R>) -> Vec<String> {
        let keys: BTreeSet<&String> = self.records.keys().chain(parent.keys()).collect();
        keys.into_iter().cloned().collect()
    }

    pub fn put(&mut self, key: impl Into<String>, record: R) {
        self.records.insert(key.into(), record);
    }

    /// Remember that `key` was locked in `mode`, keeping the stronger mode
    pub fn note_lock(&mut self, key: impl Into<String>, mode: LockMode) {
        let held = self.locks.entry(key.into()).or_insert(mode);
        if !held.covers(mode) {
            *held = mode;
        }
    }

    pub fn locks(&self) -> &BTreeMap<String, LockMode> {
        &self.locks
    }

    pub fn lock_key(&self, key: &str) -> LockKey {
        LockKey::new(self.table.as_str(), key)
    }

    /// Number of records written locally
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Reacquire every recorded lock through `locks`
    pub fn relock_all(&self, locks: &LockManager) -> Result<(), LockError> {
        for (key, mode) in &self.locks {
            locks.lock(self.xid, self.lock_key(key), *mode)?;
        }
        Ok(())
    }

    /// Apply the overlay to `parent`: deleted records are removed, the rest upserted
    pub fn merge_into(&self, parent: &mut Table<R>) {
        for (key, record) in &self.records {
            if record.is_deleted() {
                parent.remove(key);
            } else {
                parent.put(key.clone(), record.clone());
            }
        }
    }
}
