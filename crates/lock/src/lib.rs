//! Lock manager for participant records
//!
//! Provides key-level locking with shared/exclusive modes scoped by transaction.
//! `lock` blocks until the request is compatible with every other holder. Each
//! blocking wait runs cycle detection over the wait-for graph; the youngest
//! transaction on a cycle is picked as the victim and fails with a deadlock error
//! while the others keep waiting. An optional wait timeout catches cycles that
//! span several lock managers.

mod graph;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use travel_common::Xid;

/// Lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockMode {
    /// Shared lock for reading
    Shared,
    /// Exclusive lock for writing
    Exclusive,
}

impl LockMode {
    /// Check if two lock modes are compatible
    pub fn is_compatible_with(&self, other: LockMode) -> bool {
        matches!((*self, other), (LockMode::Shared, LockMode::Shared))
    }

    /// Whether holding `self` already satisfies a request for `other`
    pub fn covers(&self, other: LockMode) -> bool {
        *self == LockMode::Exclusive || other == LockMode::Shared
    }
}

/// A lockable record: table name plus business key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockKey {
    pub table: String,
    pub key: String,
}

impl LockKey {
    pub fn new(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.key)
    }
}

/// Lock acquisition failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Chosen as the victim of a wait-for cycle
    #[error("Transaction {xid} is a deadlock victim waiting for {key}")]
    Deadlock { xid: Xid, key: LockKey },

    /// Waited longer than the configured timeout
    #[error("Transaction {xid} timed out waiting for {key}")]
    WaitTimeout { xid: Xid, key: LockKey },
}

impl LockError {
    pub fn xid(&self) -> Xid {
        match self {
            LockError::Deadlock { xid, .. } | LockError::WaitTimeout { xid, .. } => *xid,
        }
    }

    pub fn key(&self) -> &LockKey {
        match self {
            LockError::Deadlock { key, .. } | LockError::WaitTimeout { key, .. } => key,
        }
    }
}

impl From<LockError> for travel_common::Error {
    fn from(e: LockError) -> Self {
        travel_common::Error::Deadlock {
            xid: e.xid(),
            resource: e.key().to_string(),
        }
    }
}

/// Information about a held lock
#[derive(Debug, Clone)]
struct LockInfo {
    holder: Xid,
    mode: LockMode,
}

/// A blocked request
#[derive(Debug, Clone)]
struct Waiter {
    key: LockKey,
    mode: LockMode,
}

#[derive(Default)]
struct LockTable {
    /// All currently held locks (key -> lock holders)
    locks: HashMap<LockKey, Vec<LockInfo>>,
    /// Requests currently blocked, one per transaction
    waiting: HashMap<Xid, Waiter>,
    /// Transactions picked as deadlock victims that have not noticed yet
    victims: HashSet<Xid>,
}

impl LockTable {
    fn held_mode(&self, xid: Xid, key: &LockKey) -> Option<LockMode> {
        self.locks
            .get(key)?
            .iter()
            .find(|lock| lock.holder == xid)
            .map(|lock| lock.mode)
    }

    /// Other transactions whose locks on `key` are incompatible with `mode`
    fn blockers(&self, xid: Xid, key: &LockKey, mode: LockMode) -> Vec<Xid> {
        self.locks
            .get(key)
            .map(|holders| {
                holders
                    .iter()
                    .filter(|lock| lock.holder != xid && !lock.mode.is_compatible_with(mode))
                    .map(|lock| lock.holder)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Outgoing wait-for edges of `xid`
    fn waits_for(&self, xid: Xid) -> Vec<Xid> {
        if self.victims.contains(&xid) {
            return Vec::new();
        }
        match self.waiting.get(&xid) {
            Some(waiter) => self.blockers(xid, &waiter.key, waiter.mode),
            None => Vec::new(),
        }
    }

    fn grant(&mut self, xid: Xid, key: LockKey, mode: LockMode) {
        let holders = self.locks.entry(key).or_default();
        match holders.iter_mut().find(|lock| lock.holder == xid) {
            Some(lock) => {
                if !lock.mode.covers(mode) {
                    lock.mode = mode;
                }
            }
            None => holders.push(LockInfo { holder: xid, mode }),
        }
    }
}

/// Lock manager for key-level locking
pub struct LockManager {
    table: Mutex<LockTable>,
    /// Signalled whenever locks are released or a victim is chosen
    changed: Condvar,
    wait_timeout: Option<Duration>,
}

impl LockManager {
    /// Create a lock manager that waits until granted or chosen as a victim
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            changed: Condvar::new(),
            wait_timeout: None,
        }
    }

    /// Create a lock manager that also gives up after `timeout`
    pub fn with_wait_timeout(timeout: Duration) -> Self {
        Self {
            wait_timeout: Some(timeout),
            ..Self::new()
        }
    }

    /// Acquire `mode` on `key` for `xid`, blocking while it conflicts.
    ///
    /// Re-entrant: a lock already held in a covering mode returns at once, and a
    /// shared lock is upgraded in place once the other holders are gone.
    pub fn lock(&self, xid: Xid, key: LockKey, mode: LockMode) -> Result<(), LockError> {
        let deadline = self.wait_timeout.map(|timeout| Instant::now() + timeout);
        let mut table = self.table.lock();

        loop {
            if table.victims.remove(&xid) {
                table.waiting.remove(&xid);
                return Err(LockError::Deadlock { xid, key });
            }

            if table
                .held_mode(xid, &key)
                .is_some_and(|held| held.covers(mode))
            {
                table.waiting.remove(&xid);
                return Ok(());
            }

            if table.blockers(xid, &key, mode).is_empty() {
                table.waiting.remove(&xid);
                table.grant(xid, key, mode);
                return Ok(());
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                table.waiting.remove(&xid);
                tracing::warn!("Transaction {} timed out waiting for {}", xid, key);
                return Err(LockError::WaitTimeout { xid, key });
            }

            table.waiting.insert(
                xid,
                Waiter {
                    key: key.clone(),
                    mode,
                },
            );

            if let Some(cycle) = graph::find_cycle(xid, |node| table.waits_for(node)) {
                let victim = cycle.iter().copied().max().unwrap_or(xid);
                tracing::warn!(
                    "Deadlock on {} among transactions {:?}, aborting {}",
                    key,
                    cycle,
                    victim
                );
                if victim == xid {
                    table.waiting.remove(&xid);
                    return Err(LockError::Deadlock { xid, key });
                }
                table.victims.insert(victim);
                self.changed.notify_all();
            }

            match deadline {
                Some(deadline) => {
                    self.changed.wait_until(&mut table, deadline);
                }
                None => self.changed.wait(&mut table),
            }
        }
    }

    /// Release every lock held by `xid` and wake all waiters
    pub fn unlock_all(&self, xid: Xid) {
        let mut table = self.table.lock();
        table.locks.retain(|_key, holders| {
            holders.retain(|lock| lock.holder != xid);
            !holders.is_empty()
        });
        table.waiting.remove(&xid);
        drop(table);

        self.changed.notify_all();
    }

    /// All locks held by `xid`, sorted by key
    pub fn locks_held_by(&self, xid: Xid) -> Vec<(LockKey, LockMode)> {
        let table = self.table.lock();
        let mut held: Vec<_> = table
            .locks
            .iter()
            .filter_map(|(key, holders)| {
                holders
                    .iter()
                    .find(|lock| lock.holder == xid)
                    .map(|lock| (key.clone(), lock.mode))
            })
            .collect();
        held.sort_by(|a, b| a.0.cmp(&b.0));
        held
    }

    /// Check if `xid` holds `key` in a mode covering `mode`
    pub fn holds(&self, xid: Xid, key: &LockKey, mode: LockMode) -> bool {
        self.table
            .lock()
            .held_mode(xid, key)
            .is_some_and(|held| held.covers(mode))
    }

    /// Check if `xid` is currently blocked
    pub fn is_waiting(&self, xid: Xid) -> bool {
        self.table.lock().waiting.contains_key(&xid)
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
