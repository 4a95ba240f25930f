//! On-disk layout of a participant's data directory
//!
//! ```text
//! <data_dir>/<table>.tbl         main table
//! <data_dir>/<xid>/<table>.tbl   shadow table of an open transaction
//! <data_dir>/pending.log         transactions still to resolve
//! ```

use super::{ShadowTable, Table};
use crate::types::Record;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use travel_common::{Error, Result, Xid};
use travel_snapshot::{SnapshotError, SnapshotStore};

const PENDING_FILE: &str = "pending.log";
const TABLE_KIND: &str = "main-table";
const SHADOW_KIND: &str = "shadow-table";
const PENDING_KIND: &str = "pending";

fn table_file(table: &str) -> String {
    format!("{}.tbl", table)
}

fn shadow_path(xid: Xid, table: &str) -> PathBuf {
    Path::new(&xid.to_string()).join(table_file(table))
}

/// Persistence for one participant
#[derive(Debug, Clone)]
pub struct ParticipantFiles {
    store: SnapshotStore,
}

impl ParticipantFiles {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let store = SnapshotStore::new(data_dir).map_err(durability)?;
        Ok(Self { store })
    }

    pub fn data_dir(&self) -> &Path {
        self.store.root()
    }

    /// Load the main table, empty if it was never written
    pub fn load_table<R: Record>(&self, table: &str) -> Result<Table<R>> {
        Ok(self
            .store
            .load(table_file(table), TABLE_KIND)
            .map_err(corrupted)?
            .unwrap_or_default())
    }

    pub fn store_table<R: Record>(&self, table: &str, records: &Table<R>) -> Result<()> {
        self.store
            .store(table_file(table), TABLE_KIND, records)
            .map_err(durability)
    }

    pub fn load_shadow<R: Record>(&self, xid: Xid, table: &str) -> Result<Option<ShadowTable<R>>> {
        self.store
            .load(shadow_path(xid, table), SHADOW_KIND)
            .map_err(corrupted)
    }

    pub fn store_shadow<R: Record>(&self, shadow: &ShadowTable<R>) -> Result<()> {
        self.store
            .store(shadow_path(shadow.xid(), shadow.table()), SHADOW_KIND, shadow)
            .map_err(durability)
    }

    /// Drop every shadow artifact of `xid`
    pub fn remove_shadows(&self, xid: Xid) -> Result<()> {
        self.store.remove_dir(xid.to_string()).map_err(durability)
    }

    /// Transactions that left a shadow directory behind.
    ///
    /// A directory whose name is not a transaction id means the data
    /// directory was tampered with.
    pub fn shadow_xids(&self) -> Result<Vec<Xid>> {
        self.store
            .list_dirs()
            .map_err(corrupted)?
            .into_iter()
            .map(|name| {
                name.parse::<Xid>()
                    .ok()
                    .filter(|xid| xid.is_valid())
                    .ok_or_else(|| {
                        Error::Corrupted(format!("unexpected directory '{}' in data dir", name))
                    })
            })
            .collect()
    }

    pub fn load_pending(&self) -> Result<BTreeSet<Xid>> {
        Ok(self
            .store
            .load(PENDING_FILE, PENDING_KIND)
            .map_err(corrupted)?
            .unwrap_or_default())
    }

    pub fn store_pending(&self, pending: &BTreeSet<Xid>) -> Result<()> {
        self.store
            .store(PENDING_FILE, PENDING_KIND, pending)
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
