//! Data operations a participant exposes to its callers

use crate::types::Record;
use travel_common::{Result, Xid};

/// Record-level reads and writes inside a transaction
///
/// Every call enlists the participant in `xid`, takes the key lock (shared for
/// reads, exclusive for writes) and persists the transaction's shadow table
/// before returning. Business-rule failures come back as `false`.
pub trait ResourceService<R: Record>: Send + Sync {
    /// Visible record under `key`, if any
    fn query(&self, xid: Xid, table: &str, key: &str) -> Result<Option<R>>;

    /// Every visible record in `table`
    fn query_all(&self, xid: Xid, table: &str) -> Result<Vec<R>>;

    /// Add `record`; false if a live record already has its key
    fn insert(&self, xid: Xid, table: &str, record: R) -> Result<bool>;

    /// Replace the record under `key`; false if there is none.
    ///
    /// `record` must carry `key` as its own key, otherwise the request is
    /// rejected before any lock is taken.
    fn update(&self, xid: Xid, table: &str, key: &str, record: R) -> Result<bool>;

    /// Mark the record under `key` deleted; false if there is none
    fn delete(&self, xid: Xid, table: &str, key: &str) -> Result<bool>;
}
