//! Committed main table

use crate::types::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Committed records of one resource type, keyed by primary key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "R: Record")]
pub struct Table<R> {
    records: BTreeMap<String, R>,
}

impl<R: Record> Table<R> {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&R> {
        self.records.get(key)
    }

    pub fn put(&mut self, key: impl Into<String>, record: R) {
        self.records.insert(key.into(), record);
    }

    pub fn remove(&mut self, key: &str) -> Option<R> {
        self.records.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &R)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<R: Record> Default for Table<R> {
    fn default() -> Self {
        Self::new()
    }
}
