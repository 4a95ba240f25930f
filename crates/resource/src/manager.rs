//! Resource manager: a two-phase commit participant for one record type
//!
//! Every operation records its transaction in the durable pending set, enlists
//! with the coordinator, takes the key lock and persists the transaction's
//! shadow table before answering. Commit merges the shadow table into the main
//! table; abort throws it away. A restart reloads the shadow tables of pending
//! transactions, reacquires their locks and lets [`ResourceManager::reconnect`]
//! learn each outcome from the coordinator. [`ResourceManager::start`] does all
//! of that and leaves a [`Monitor`] retrying until the coordinator answers.

use crate::config::ResourceConfig;
use crate::monitor::Monitor;
use crate::service::ResourceService;
use crate::storage::{ParticipantFiles, ShadowTable, Table};
use crate::types::Record;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use travel_common::{
    CoordinatorLink, Error, FaultInjector, ParticipantDieTime, ParticipantService, Result,
    TransactionStatus, Xid,
};
use travel_lock::{LockKey, LockManager, LockMode};

/// In-memory state of one open transaction
struct TxnState<R> {
    shadow: ShadowTable<R>,
    /// Set once commit or abort has claimed the transaction
    finished: bool,
}

type TxnHandle<R> = Arc<Mutex<TxnState<R>>>;

struct Transactions<R> {
    /// Mirrors `pending.log`
    pending: BTreeSet<Xid>,
    active: HashMap<Xid, TxnHandle<R>>,
}

/// Participant serving the `R::RESOURCE` table
pub struct ResourceManager<R: Record> {
    config: ResourceConfig,
    files: ParticipantFiles,
    /// Committed records
    main: RwLock<Table<R>>,
    txns: Mutex<Transactions<R>>,
    locks: LockManager,
    coordinator: Arc<dyn CoordinatorLink>,
    faults: Arc<dyn FaultInjector>,
    die_time: Mutex<ParticipantDieTime>,
    alive: AtomicBool,
}

impl<R: Record> ResourceManager<R> {
    /// Open the participant over `config.data_dir`, recovering open transactions.
    ///
    /// Fails with [`Error::Corrupted`] if a shadow table belongs to a
    /// transaction missing from the pending set.
    pub fn open(
        config: ResourceConfig,
        coordinator: Arc<dyn CoordinatorLink>,
        faults: Arc<dyn FaultInjector>,
    ) -> Result<Self> {
        let files = ParticipantFiles::open(&config.data_dir)?;
        let main = files.load_table::<R>(R::RESOURCE)?;
        let pending = files.load_pending()?;
        let locks = match config.lock_wait_timeout {
            Some(timeout) => LockManager::with_wait_timeout(timeout),
            None => LockManager::new(),
        };

        let mut active = HashMap::new();
        for xid in files.shadow_xids()? {
            if !pending.contains(&xid) {
                return Err(Error::Corrupted(format!(
                    "shadow table for transaction {} is not in the pending set",
                    xid
                )));
            }
            if let Some(shadow) = files.load_shadow::<R>(xid, R::RESOURCE)? {
                shadow.relock_all(&locks)?;
                tracing::info!(
                    "[{}] Recovered transaction {} ({} records, {} locks)",
                    config.name,
                    xid,
                    shadow.len(),
                    shadow.locks().len()
                );
                active.insert(
                    xid,
                    Arc::new(Mutex::new(TxnState {
                        shadow,
                        finished: false,
                    })),
                );
            }
        }

        tracing::info!(
            "[{}] Opened {} with {} records, {} pending transactions",
            config.name,
            R::RESOURCE,
            main.len(),
            pending.len()
        );

        Ok(Self {
            config,
            files,
            main: RwLock::new(main),
            txns: Mutex::new(Transactions { pending, active }),
            locks,
            coordinator,
            faults,
            die_time: Mutex::new(ParticipantDieTime::Never),
            alive: AtomicBool::new(true),
        })
    }

    /// Open the participant and start its coordinator monitor.
    ///
    /// The monitor re-enlists every recovered transaction, retrying with
    /// `reconnect_backoff` until the coordinator answers, then pings it every
    /// `monitor_interval`. Must be called from within a tokio runtime.
    pub fn start(
        config: ResourceConfig,
        coordinator: Arc<dyn CoordinatorLink>,
        faults: Arc<dyn FaultInjector>,
    ) -> Result<(Arc<Self>, Monitor)> {
        let manager = Arc::new(Self::open(config, coordinator, faults)?);
        let monitor = Monitor::start(manager.clone());
        Ok((manager, monitor))
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Copy of the committed table
    pub fn table(&self) -> Table<R> {
        self.main.read().clone()
    }

    /// Transactions this participant still has to resolve
    pub fn pending(&self) -> Vec<Xid> {
        self.txns.lock().pending.iter().copied().collect()
    }

    /// Keys `xid` currently holds locks on, with their modes
    pub fn locks_held_by(&self, xid: Xid) -> Vec<(String, LockMode)> {
        self.locks
            .locks_held_by(xid)
            .into_iter()
            .map(|(key, mode)| (key.key, mode))
            .collect()
    }

    /// Re-enlist every pending transaction and apply decided outcomes.
    ///
    /// Succeeds only once the coordinator answered for all of them.
    pub fn reconnect(&self) -> Result<()> {
        self.ensure_alive()?;
        let coordinator = self.coordinator.coordinator()?;
        coordinator.test_connection()?;

        for xid in self.pending() {
            let status = coordinator.enlist(xid, &self.config.name);
            self.check_die(ParticipantDieTime::AfterEnlist)?;

            match status {
                Ok(TransactionStatus::Committed) => {
                    tracing::info!("[{}] Transaction {} committed while away", self.config.name, xid);
                    self.finish_commit(xid)?;
                }
                Ok(TransactionStatus::Aborted) => {
                    tracing::info!("[{}] Transaction {} aborted while away", self.config.name, xid);
                    self.finish_abort(xid)?;
                }
                Ok(status) => {
                    tracing::debug!("[{}] Re-enlisted transaction {} ({})", self.config.name, xid, status);
                }
                Err(Error::InvalidTransaction { reason, .. }) => {
                    tracing::info!(
                        "[{}] Coordinator does not know transaction {} ({}), aborting",
                        self.config.name,
                        xid,
                        reason
                    );
                    self.finish_abort(xid)?;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("[{}] Connected to coordinator", self.config.name);
        Ok(())
    }

    /// Ask the coordinator whether it is alive
    pub fn ping_coordinator(&self) -> Result<bool> {
        self.coordinator.coordinator()?.test_connection()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(Error::unavailable(self.config.name.as_str(), "participant is down"))
        }
    }

    fn die(&self, point: &str) -> Error {
        self.alive.store(false, Ordering::SeqCst);
        self.faults.halt(&self.config.name, point)
    }

    fn check_die(&self, point: ParticipantDieTime) -> Result<()> {
        if *self.die_time.lock() == point {
            return Err(self.die(&point.to_string()));
        }
        Ok(())
    }

    /// A participant that cannot persist its state must not go on
    fn durable(&self, result: Result<()>) -> Result<()> {
        result.map_err(|e| {
            tracing::error!("[{}] {}", self.config.name, e);
            self.die("durability failure")
        })
    }

    fn check_table(&self, table: &str) -> Result<()> {
        if table == R::RESOURCE {
            Ok(())
        } else {
            Err(Error::InvalidRequest(format!(
                "{} serves table '{}', not '{}'",
                self.config.name,
                R::RESOURCE,
                table
            )))
        }
    }

    /// Common prologue of every data operation
    fn enter(&self, xid: Xid, table: &str) -> Result<TxnHandle<R>> {
        self.ensure_alive()?;
        self.check_table(table)?;
        if !xid.is_valid() {
            return Err(Error::invalid_transaction(xid, "transaction id must be positive"));
        }

        self.add_pending(xid)?;
        self.enlist(xid)?;
        self.check_die(ParticipantDieTime::AfterEnlist)?;
        self.txn_state(xid)
    }

    fn add_pending(&self, xid: Xid) -> Result<()> {
        let mut txns = self.txns.lock();
        if txns.pending.insert(xid) {
            let stored = self.files.store_pending(&txns.pending);
            self.durable(stored)?;
        }
        Ok(())
    }

    fn enlist(&self, xid: Xid) -> Result<()> {
        let status = self
            .coordinator
            .coordinator()
            .and_then(|coordinator| coordinator.enlist(xid, &self.config.name));

        match status {
            Ok(TransactionStatus::Committed) => {
                self.finish_commit(xid)?;
                Err(Error::invalid_transaction(xid, "transaction already committed"))
            }
            Ok(TransactionStatus::Aborted) => {
                self.finish_abort(xid)?;
                Err(Error::invalid_transaction(xid, "transaction already aborted"))
            }
            Ok(_) => Ok(()),
            Err(e @ Error::InvalidTransaction { .. }) => {
                self.finish_abort(xid)?;
                Err(e)
            }
            Err(e) => {
                tracing::warn!("[{}] Enlist of transaction {} failed: {}", self.config.name, xid, e);
                Err(e)
            }
        }
    }

    fn txn_state(&self, xid: Xid) -> Result<TxnHandle<R>> {
        let mut txns = self.txns.lock();
        if !txns.pending.contains(&xid) {
            return Err(Error::invalid_transaction(xid, "transaction already finished"));
        }
        let state = txns.active.entry(xid).or_insert_with(|| {
            Arc::new(Mutex::new(TxnState {
                shadow: ShadowTable::new(R::RESOURCE, xid),
                finished: false,
            }))
        });
        Ok(state.clone())
    }

    /// Take the lock on `key`; a deadlock aborts the whole transaction
    fn acquire(&self, xid: Xid, key: &str, mode: LockMode) -> Result<()> {
        match self.locks.lock(xid, LockKey::new(R::RESOURCE, key), mode) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("[{}] {}", self.config.name, e);
                self.abort_deadlocked(xid);
                Err(e.into())
            }
        }
    }

    fn abort_deadlocked(&self, xid: Xid) {
        let aborted = self
            .coordinator
            .coordinator()
            .and_then(|coordinator| coordinator.abort(xid, "deadlock"));
        if let Err(e) = aborted {
            tracing::warn!(
                "[{}] Coordinator abort of deadlocked transaction {} failed: {}",
                self.config.name,
                xid,
                e
            );
        }
        if let Err(e) = self.finish_abort(xid) {
            tracing::error!("[{}] Local abort of transaction {} failed: {}", self.config.name, xid, e);
        }
    }

    /// Run `op` against the transaction's shadow table and persist the result
    fn with_shadow<T>(
        &self,
        xid: Xid,
        state: &Mutex<TxnState<R>>,
        op: impl FnOnce(&mut ShadowTable<R>, &Table<R>) -> T,
    ) -> Result<T> {
        let mut state = state.lock();
        if state.finished {
            drop(state);
            self.locks.unlock_all(xid);
            return Err(Error::invalid_transaction(xid, "transaction already finished"));
        }

        let result = {
            let main = self.main.read();
            op(&mut state.shadow, &*main)
        };

        let stored = self.files.store_shadow(&state.shadow);
        self.durable(stored)?;
        Ok(result)
    }

    fn finish_commit(&self, xid: Xid) -> Result<()> {
        let state = self.txns.lock().active.get(&xid).cloned();
        if let Some(state) = state {
            let mut state = state.lock();
            if !state.finished {
                let mut main = self.main.write();
                state.shadow.merge_into(&mut *main);
                let stored = self.files.store_table(R::RESOURCE, &*main);
                self.durable(stored)?;
                state.finished = true;
                tracing::debug!(
                    "[{}] Merged {} records of transaction {}",
                    self.config.name,
                    state.shadow.len(),
                    xid
                );
            }
        }
        self.forget(xid)
    }

    fn finish_abort(&self, xid: Xid) -> Result<()> {
        let state = self.txns.lock().active.get(&xid).cloned();
        if let Some(state) = state {
            state.lock().finished = true;
        }
        self.forget(xid)
    }

    /// Drop every trace of a finished transaction
    fn forget(&self, xid: Xid) -> Result<()> {
        let removed = self.files.remove_shadows(xid);
        self.durable(removed)?;

        {
            let mut txns = self.txns.lock();
            txns.active.remove(&xid);
            if txns.pending.remove(&xid) {
                let stored = self.files.store_pending(&txns.pending);
                self.durable(stored)?;
            }
        }

        self.locks.unlock_all(xid);
        Ok(())
    }
}

impl<R: Record> ResourceService<R> for ResourceManager<R> {
    fn query(&self, xid: Xid, table: &str, key: &str) -> Result<Option<R>> {
        let state = self.enter(xid, table)?;
        self.acquire(xid, key, LockMode::Shared)?;

        self.with_shadow(xid, &state, |shadow, main| {
            shadow.note_lock(key, LockMode::Shared);
            shadow.get(key, main).filter(|record| !record.is_deleted())
        })
    }

    fn query_all(&self, xid: Xid, table: &str) -> Result<Vec<R>> {
        let state = self.enter(xid, table)?;
        let keys = {
            let state = state.lock();
            let main = self.main.read();
            state.shadow.keys(&*main)
        };

        for key in &keys {
            self.acquire(xid, key, LockMode::Shared)?;
        }

        self.with_shadow(xid, &state, |shadow, main| {
            keys.iter()
                .filter_map(|key| {
                    shadow.note_lock(key.as_str(), LockMode::Shared);
                    shadow.get(key, main)
                })
                .filter(|record| !record.is_deleted())
                .collect()
        })
    }

    fn insert(&self, xid: Xid, table: &str, mut record: R) -> Result<bool> {
        let state = self.enter(xid, table)?;
        let key = record.key();
        self.acquire(xid, &key, LockMode::Exclusive)?;

        self.with_shadow(xid, &state, |shadow, main| {
            shadow.note_lock(key.as_str(), LockMode::Exclusive);
            if shadow.get(&key, main).is_some_and(|existing| !existing.is_deleted()) {
                return false;
            }
            record.set_deleted(false);
            shadow.put(key, record);
            true
        })
    }

    fn update(&self, xid: Xid, table: &str, key: &str, mut record: R) -> Result<bool> {
        let record_key = record.key();
        if record_key != key {
            return Err(Error::InvalidRequest(format!(
                "record keyed '{}' cannot replace '{}'",
                record_key, key
            )));
        }
        let state = self.enter(xid, table)?;
        self.acquire(xid, key, LockMode::Exclusive)?;

        self.with_shadow(xid, &state, |shadow, main| {
            shadow.note_lock(key, LockMode::Exclusive);
            if !shadow.get(key, main).is_some_and(|existing| !existing.is_deleted()) {
                return false;
            }
            record.set_deleted(false);
            shadow.put(key, record);
            true
        })
    }

    fn delete(&self, xid: Xid, table: &str, key: &str) -> Result<bool> {
        let state = self.enter(xid, table)?;
        self.acquire(xid, key, LockMode::Exclusive)?;

        self.with_shadow(xid, &state, |shadow, main| {
            shadow.note_lock(key, LockMode::Exclusive);
            match shadow.get(key, main) {
                Some(mut existing) if !existing.is_deleted() => {
                    existing.set_deleted(true);
                    shadow.put(key, existing);
                    true
                }
                _ => false,
            }
        })
    }
}

impl<R: Record> ParticipantService for ResourceManager<R> {
    fn name(&self) -> Result<String> {
        self.ensure_alive()?;
        Ok(self.config.name.clone())
    }

    fn test_connection(&self) -> Result<bool> {
        self.ensure_alive()?;
        Ok(true)
    }

    fn prepare(&self, xid: Xid) -> Result<bool> {
        self.ensure_alive()?;
        tracing::debug!("[{}] Preparing transaction {}", self.config.name, xid);
        self.check_die(ParticipantDieTime::BeforePrepare)?;

        let state = {
            let txns = self.txns.lock();
            if !txns.pending.contains(&xid) {
                return Err(Error::invalid_transaction(xid, "transaction unknown to participant"));
            }
            txns.active.get(&xid).cloned()
        };

        if let Some(state) = state {
            let state = state.lock();
            if state.finished {
                return Err(Error::invalid_transaction(xid, "transaction already finished"));
            }
            if let Err(e) = state.shadow.relock_all(&self.locks) {
                tracing::error!("[{}] Relock of transaction {} failed: {}", self.config.name, xid, e);
                return Err(self.die("relock failure"));
            }
        }

        self.check_die(ParticipantDieTime::AfterPrepare)?;
        tracing::debug!("[{}] Prepared transaction {}", self.config.name, xid);
        Ok(true)
    }

    fn commit(&self, xid: Xid) -> Result<()> {
        self.ensure_alive()?;
        tracing::debug!("[{}] Committing transaction {}", self.config.name, xid);
        self.check_die(ParticipantDieTime::BeforeCommit)?;
        self.finish_commit(xid)?;
        tracing::info!("[{}] Committed transaction {}", self.config.name, xid);
        Ok(())
    }

    fn abort(&self, xid: Xid) -> Result<()> {
        self.ensure_alive()?;
        tracing::debug!("[{}] Aborting transaction {}", self.config.name, xid);
        self.check_die(ParticipantDieTime::BeforeAbort)?;
        self.finish_abort(xid)?;
        tracing::info!("[{}] Aborted transaction {}", self.config.name, xid);
        Ok(())
    }

    fn set_die_time(&self, die_time: ParticipantDieTime) -> Result<()> {
        self.ensure_alive()?;
        tracing::info!("[{}] Die time set to {}", self.config.name, die_time);
        *self.die_time.lock() = die_time;
        Ok(())
    }

    fn die_now(&self) -> Result<()> {
        self.ensure_alive()?;
        Err(self.die("die_now"))
    }
}
