use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// A row stored in a participant's table
///
/// Deletion is soft: a deleted record stays in the shadow table until commit
/// removes it from the main table.
pub trait Record: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table name for this record type
    const RESOURCE: &'static str;

    /// Primary key of the record
    fn key(&self) -> String;

    fn is_deleted(&self) -> bool;

    fn set_deleted(&mut self, deleted: bool);
}
