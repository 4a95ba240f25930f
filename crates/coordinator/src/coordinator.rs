//! Two-phase commit coordinator
//!
//! Owns the authoritative status of every transaction. Status changes are
//! persisted before anyone can observe them; participants are only ever
//! called with the state mutex released, so a participant may call back into
//! the coordinator (an abort after a deadlock, a late enlist) while the
//! coordinator is waiting on it.

use crate::config::CoordinatorConfig;
use crate::log::{TransactionLog, TransactionMap, TransactionRecord};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use travel_common::{
    CoordinatorDieTime, CoordinatorService, Error, FaultInjector, ParticipantDirectory, Result,
    TransactionStatus, Xid,
};

/// The decision sent in phase 2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Commit,
    Abort,
}

struct State {
    last_xid: Xid,
    transactions: TransactionMap,
}

/// Transaction coordinator
///
/// The status of every transaction is retained for the lifetime of the log:
/// `if_committed` and late enlists must be answered for any id ever handed out,
/// and a participant restarting after a long outage may ask about an old one.
/// The log is rewritten whole on each change, so `start` and a first enlist
/// cost time proportional to the number of transactions ever started.
pub struct Coordinator {
    config: CoordinatorConfig,
    log: TransactionLog,
    state: Mutex<State>,
    participants: Arc<dyn ParticipantDirectory>,
    faults: Arc<dyn FaultInjector>,
    die_time: Mutex<CoordinatorDieTime>,
    alive: AtomicBool,
}

impl Coordinator {
    /// Open the coordinator over `config.data_dir`.
    ///
    /// Transactions caught in phase 1 by a crash are aborted, then every
    /// decided transaction with unconfirmed participants is redriven.
    pub fn open(
        config: CoordinatorConfig,
        participants: Arc<dyn ParticipantDirectory>,
        faults: Arc<dyn FaultInjector>,
    ) -> Result<Self> {
        let log = TransactionLog::open(&config.data_dir)?;
        let last_xid = log.load_counter()?;
        let mut transactions = log.load_transactions()?;

        let mut presumed_aborted = 0;
        for (xid, record) in transactions.iter_mut() {
            if record.status == TransactionStatus::Preparing {
                tracing::info!("[{}] Transaction {} was preparing, aborting", config.name, xid);
                record.status = TransactionStatus::Aborted;
                presumed_aborted += 1;
            }
        }
        if presumed_aborted > 0 {
            log.store_transactions(&transactions)?;
        }

        tracing::info!(
            "[{}] Opened with last xid {} and {} transactions",
            config.name,
            last_xid,
            transactions.len()
        );

        let coordinator = Self {
            config,
            log,
            state: Mutex::new(State {
                last_xid,
                transactions,
            }),
            participants,
            faults,
            die_time: Mutex::new(CoordinatorDieTime::Never),
            alive: AtomicBool::new(true),
        };
        coordinator.redrive()?;
        Ok(coordinator)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Retained status of `xid`
    pub fn status(&self, xid: Xid) -> Option<TransactionStatus> {
        self.state
            .lock()
            .transactions
            .get(&xid)
            .map(|record| record.status)
    }

    /// Participants of `xid` that still owe an acknowledgement, sorted
    pub fn unconfirmed(&self, xid: Xid) -> Vec<String> {
        self.state
            .lock()
            .transactions
            .get(&xid)
            .map(|record| record.participants.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Re-send the decision of every decided transaction to the participants
    /// that have not confirmed it yet
    pub fn redrive(&self) -> Result<()> {
        self.ensure_alive()?;
        let undelivered: Vec<(Xid, Decision)> = {
            let state = self.state.lock();
            state
                .transactions
                .iter()
                .filter(|(_, record)| !record.participants.is_empty())
                .filter_map(|(xid, record)| match record.status {
                    TransactionStatus::Committed => Some((*xid, Decision::Commit)),
                    TransactionStatus::Aborted => Some((*xid, Decision::Abort)),
                    _ => None,
                })
                .collect()
        };

        for (xid, decision) in undelivered {
            tracing::info!("[{}] Redriving {:?} of transaction {}", self.config.name, decision, xid);
            self.deliver(xid, decision)?;
        }
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(Error::unavailable(self.config.name.as_str(), "coordinator is down"))
        }
    }

    fn die(&self, point: &str) -> Error {
        self.alive.store(false, Ordering::SeqCst);
        self.faults.halt(&self.config.name, point)
    }

    fn check_die(&self, point: CoordinatorDieTime) -> Result<()> {
        if *self.die_time.lock() == point {
            return Err(self.die(&point.to_string()));
        }
        Ok(())
    }

    /// A coordinator that cannot persist its log must not go on
    fn durable(&self, result: Result<()>) -> Result<()> {
        result.map_err(|e| {
            tracing::error!("[{}] {}", self.config.name, e);
            self.die("durability failure")
        })
    }

    fn persist(&self, state: &State) -> Result<()> {
        let stored = self.log.store_transactions(&state.transactions);
        self.durable(stored)
    }

    /// Move `xid` to ABORTED unless already decided; false if it was committed
    fn mark_aborted(&self, xid: Xid) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(record) = state.transactions.get_mut(&xid) else {
            return Ok(true);
        };
        match record.status {
            TransactionStatus::Committed => Ok(false),
            TransactionStatus::Aborted => Ok(true),
            TransactionStatus::Initiated | TransactionStatus::Preparing => {
                record.status = TransactionStatus::Aborted;
                self.persist(&state)?;
                Ok(true)
            }
        }
    }

    /// Phase 2: send `decision` to every unconfirmed participant.
    ///
    /// Unreachable participants stay recorded and pick the decision up when
    /// they re-enlist or on the next redrive.
    fn deliver(&self, xid: Xid, decision: Decision) -> Result<()> {
        for name in self.unconfirmed(xid) {
            let delivered = self.participants.participant(&name).and_then(|participant| {
                match decision {
                    Decision::Commit => participant.commit(xid),
                    Decision::Abort => participant.abort(xid),
                }
            });

            match delivered {
                Ok(()) => {
                    let mut state = self.state.lock();
                    if let Some(record) = state.transactions.get_mut(&xid)
                        && record.participants.remove(&name)
                    {
                        self.persist(&state)?;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "[{}] Could not deliver {:?} of transaction {} to {}: {}",
                        self.config.name,
                        decision,
                        xid,
                        name,
                        e
                    );
                }
            }
        }
        Ok(())
    }

    /// Phase 1: true only if every participant voted yes
    fn collect_votes(&self, xid: Xid, participants: &[String]) -> std::result::Result<(), String> {
        for name in participants {
            let vote = self
                .participants
                .participant(name)
                .and_then(|participant| participant.prepare(xid));

            match vote {
                Ok(true) => {
                    tracing::debug!("[{}] {} prepared transaction {}", self.config.name, name, xid);
                }
                Ok(false) => return Err(format!("{} voted to abort", name)),
                Err(e) => return Err(format!("prepare failed on {}: {}", name, e)),
            }
        }
        Ok(())
    }

    fn abort_after_prepare(&self, xid: Xid, reason: String) -> Result<()> {
        tracing::warn!("[{}] Aborting transaction {}: {}", self.config.name, xid, reason);
        if self.mark_aborted(xid)? {
            self.deliver(xid, Decision::Abort)?;
        }
        Err(Error::aborted(xid, reason))
    }
}

impl CoordinatorService for Coordinator {
    fn start(&self) -> Result<Xid> {
        self.ensure_alive()?;
        let mut state = self.state.lock();

        let xid = state.last_xid.next();
        let stored = self.log.store_counter(xid);
        self.durable(stored)?;
        state.last_xid = xid;

        state.transactions.insert(xid, TransactionRecord::new());
        self.persist(&state)?;

        tracing::info!("[{}] Started transaction {}", self.config.name, xid);
        Ok(xid)
    }

    fn enlist(&self, xid: Xid, participant: &str) -> Result<TransactionStatus> {
        self.ensure_alive()?;
        let mut state = self.state.lock();
        let record = state
            .transactions
            .get_mut(&xid)
            .ok_or_else(|| Error::invalid_transaction(xid, "unknown transaction"))?;

        let status = match record.status {
            TransactionStatus::Initiated => {
                if record.participants.insert(participant.to_string()) {
                    self.persist(&state)?;
                    tracing::debug!("[{}] {} enlisted in transaction {}", self.config.name, participant, xid);
                }
                TransactionStatus::Initiated
            }
            TransactionStatus::Preparing => {
                tracing::warn!(
                    "[{}] {} enlisted in transaction {} during prepare, aborting",
                    self.config.name,
                    participant,
                    xid
                );
                record.status = TransactionStatus::Aborted;
                self.persist(&state)?;
                TransactionStatus::Aborted
            }
            decided => decided,
        };
        Ok(status)
    }

    fn commit(&self, xid: Xid) -> Result<()> {
        self.ensure_alive()?;

        let participants: Vec<String> = {
            let mut state = self.state.lock();
            let record = state
                .transactions
                .get_mut(&xid)
                .ok_or_else(|| Error::invalid_transaction(xid, "unknown transaction"))?;
            if record.status != TransactionStatus::Initiated {
                return Err(Error::invalid_transaction(
                    xid,
                    format!("cannot commit a {} transaction", record.status),
                ));
            }
            record.status = TransactionStatus::Preparing;
            let participants = record.participants.iter().cloned().collect();
            self.persist(&state)?;
            participants
        };
        tracing::info!(
            "[{}] Preparing transaction {} on {:?}",
            self.config.name,
            xid,
            participants
        );

        if let Err(reason) = self.collect_votes(xid, &participants) {
            return self.abort_after_prepare(xid, reason);
        }

        self.check_die(CoordinatorDieTime::BeforeCommit)?;

        // A late enlist or a concurrent abort may have decided already
        let committed = {
            let mut state = self.state.lock();
            match state.transactions.get_mut(&xid) {
                Some(record) if record.status == TransactionStatus::Preparing => {
                    record.status = TransactionStatus::Committed;
                    self.persist(&state)?;
                    true
                }
                _ => false,
            }
        };
        if !committed {
            return self.abort_after_prepare(xid, "aborted while preparing".to_string());
        }
        tracing::info!("[{}] Transaction {} committed", self.config.name, xid);

        self.check_die(CoordinatorDieTime::AfterCommit)?;
        self.deliver(xid, Decision::Commit)
    }

    fn abort(&self, xid: Xid, reason: &str) -> Result<()> {
        self.ensure_alive()?;
        {
            let mut state = self.state.lock();
            let record = state
                .transactions
                .get_mut(&xid)
                .ok_or_else(|| Error::invalid_transaction(xid, "unknown transaction"))?;
            if record.status.is_terminal() {
                return Err(Error::invalid_transaction(
                    xid,
                    format!("transaction already {}", record.status),
                ));
            }
            record.status = TransactionStatus::Aborted;
            self.persist(&state)?;
        }
        tracing::info!("[{}] Aborting transaction {}: {}", self.config.name, xid, reason);

        self.deliver(xid, Decision::Abort)
    }

    fn if_committed(&self, xid: Xid) -> Result<bool> {
        self.ensure_alive()?;
        Ok(self.status(xid) == Some(TransactionStatus::Committed))
    }

    fn test_connection(&self) -> Result<bool> {
        self.ensure_alive()?;
        Ok(true)
    }

    fn set_die_time(&self, die_time: CoordinatorDieTime) -> Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use travel_common::{ParticipantDieTime, ParticipantService, Registry, SimulatedCrash};

    /// Participant that votes from a script and counts decisions
    struct Voter {
        name: &'static str,
        vote: bool,
        reachable: AtomicBool,
        /// Votes, but loses every decision
        deaf: AtomicBool,
        decisions: Mutex<HashMap<Xid, Vec<&'static str>>>,
    }

    impl Voter {
        fn new(name: &'static str, vote: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                vote,
                reachable: AtomicBool::new(true),
                deaf: AtomicBool::new(false),
                decisions: Mutex::new(HashMap::new()),
            })
        }

        fn decisions(&self, xid: Xid) -> Vec<&'static str> {
            self.decisions.lock().get(&xid).cloned().unwrap_or_default()
        }

        fn check(&self) -> Result<()> {
            if self.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(Error::unavailable(self.name, "unreachable"))
            }
        }

        fn record(&self, xid: Xid, decision: &'static str) -> Result<()> {
            self.check()?;
            if self.deaf.load(Ordering::SeqCst) {
                return Err(Error::unavailable(self.name, "connection reset"));
            }
            self.decisions.lock().entry(xid).or_default().push(decision);
            Ok(())
        }
    }

    impl ParticipantService for Voter {
        fn name(&self) -> Result<String> {
            Ok(self.name.to_string())
        }
        fn test_connection(&self) -> Result<bool> {
            self.check().map(|_| true)
        }
        fn prepare(&self, _xid: Xid) -> Result<bool> {
            self.check()?;
            Ok(self.vote)
        }
        fn commit(&self, xid: Xid) -> Result<()> {
            self.record(xid, "commit")
        }
        fn abort(&self, xid: Xid) -> Result<()> {
            self.record(xid, "abort")
        }
        fn set_die_time(&self, _die_time: ParticipantDieTime) -> Result<()> {
            Ok(())
        }
        fn die_now(&self) -> Result<()> {
            Ok(())
        }
    }

    fn open(dir: &TempDir, registry: &Arc<Registry>) -> Coordinator {
        Coordinator::open(
            CoordinatorConfig::new(dir.path()),
            registry.clone(),
            Arc::new(SimulatedCrash),
        )
        .unwrap()
    }

    #[test]
    fn test_xids_are_durable_and_increasing() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new());

        let coordinator = open(&dir, &registry);
        assert_eq!(coordinator.start().unwrap(), Xid::new(1));
        assert_eq!(coordinator.start().unwrap(), Xid::new(2));
        drop(coordinator);

        let coordinator = open(&dir, &registry);
        assert_eq!(coordinator.start().unwrap(), Xid::new(3));
        assert_eq!(coordinator.status(Xid::new(1)), Some(TransactionStatus::Initiated));
    }

    #[test]
    fn test_enlist_by_status() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new());
        let coordinator = open(&dir, &registry);

        assert!(matches!(
            coordinator.enlist(Xid::new(9), "rm.cars"),
            Err(Error::InvalidTransaction { .. })
        ));

        let xid = coordinator.start().unwrap();
        assert_eq!(coordinator.enlist(xid, "rm.cars").unwrap(), TransactionStatus::Initiated);
        assert_eq!(coordinator.enlist(xid, "rm.cars").unwrap(), TransactionStatus::Initiated);
        assert_eq!(coordinator.unconfirmed(xid), vec!["rm.cars"]);

        coordinator.abort(xid, "test").unwrap();
        assert_eq!(coordinator.enlist(xid, "rm.hotels").unwrap(), TransactionStatus::Aborted);
    }

    #[test]
    fn test_commit_with_yes_votes() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new());
        let cars = Voter::new("rm.cars", true);
        let hotels = Voter::new("rm.hotels", true);
        registry.bind_participant("rm.cars", cars.clone());
        registry.bind_participant("rm.hotels", hotels.clone());
        let coordinator = open(&dir, &registry);

        let xid = coordinator.start().unwrap();
        coordinator.enlist(xid, "rm.cars").unwrap();
        coordinator.enlist(xid, "rm.hotels").unwrap();
        coordinator.commit(xid).unwrap();

        assert!(coordinator.if_committed(xid).unwrap());
        assert_eq!(cars.decisions(xid), vec!["commit"]);
        assert_eq!(hotels.decisions(xid), vec!["commit"]);
        assert!(coordinator.unconfirmed(xid).is_empty());

        // Decided transactions cannot be committed or aborted again
        assert!(matches!(coordinator.commit(xid), Err(Error::InvalidTransaction { .. })));
        assert!(matches!(coordinator.abort(xid, "late"), Err(Error::InvalidTransaction { .. })));
    }

    #[test]
    fn test_no_vote_aborts_everyone() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new());
        let cars = Voter::new("rm.cars", true);
        let hotels = Voter::new("rm.hotels", false);
        registry.bind_participant("rm.cars", cars.clone());
        registry.bind_participant("rm.hotels", hotels.clone());
        let coordinator = open(&dir, &registry);

        let xid = coordinator.start().unwrap();
        coordinator.enlist(xid, "rm.cars").unwrap();
        coordinator.enlist(xid, "rm.hotels").unwrap();

        assert!(matches!(coordinator.commit(xid), Err(Error::TransactionAborted { .. })));
        assert_eq!(coordinator.status(xid), Some(TransactionStatus::Aborted));
        assert_eq!(cars.decisions(xid), vec!["abort"]);
        assert_eq!(hotels.decisions(xid), vec!["abort"]);
    }

    #[test]
    fn test_unreachable_participant_in_phase_two() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new());
        let cars = Voter::new("rm.cars", true);
        cars.deaf.store(true, Ordering::SeqCst);
        registry.bind_participant("rm.cars", cars.clone());
        let coordinator = open(&dir, &registry);

        let xid = coordinator.start().unwrap();
        coordinator.enlist(xid, "rm.cars").unwrap();

        // The decision stands even though it could not be delivered
        coordinator.commit(xid).unwrap();
        assert!(coordinator.if_committed(xid).unwrap());
        assert_eq!(coordinator.unconfirmed(xid), vec!["rm.cars"]);
        assert!(cars.decisions(xid).is_empty());

        cars.deaf.store(false, Ordering::SeqCst);
        coordinator.redrive().unwrap();
        assert_eq!(cars.decisions(xid), vec!["commit"]);
        assert!(coordinator.unconfirmed(xid).is_empty());
    }

    #[test]
    fn test_crash_during_prepare_is_presumed_abort() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new());
        let cars = Voter::new("rm.cars", true);
        registry.bind_participant("rm.cars", cars.clone());

        let coordinator = open(&dir, &registry);
        let xid = coordinator.start().unwrap();
        coordinator.enlist(xid, "rm.cars").unwrap();
        coordinator.set_die_time(CoordinatorDieTime::BeforeCommit).unwrap();
        assert!(matches!(coordinator.commit(xid), Err(Error::Crashed { .. })));
        assert!(coordinator.start().unwrap_err().is_communication_failure());
        drop(coordinator);

        let restarted = open(&dir, &registry);
        assert_eq!(restarted.status(xid), Some(TransactionStatus::Aborted));
        assert_eq!(cars.decisions(xid), vec!["abort"]);
        assert!(!restarted.if_committed(xid).unwrap());
    }

    #[test]
    fn test_unwritable_log_kills_coordinator() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new());
        let coordinator = open(&dir, &registry);

        // The atomic write cannot create its temporary file
        let blocker = dir.path().join("transactions.log.tmp");
        std::fs::create_dir(&blocker).unwrap();

        assert!(matches!(coordinator.start(), Err(Error::Crashed { .. })));
        assert!(!coordinator.is_alive());
        assert!(coordinator.start().unwrap_err().is_communication_failure());
        drop(coordinator);

        // The counter was persisted first, so the lost id is never reused
        std::fs::remove_dir(&blocker).unwrap();
        let restarted = open(&dir, &registry);
        assert_eq!(restarted.status(Xid::new(1)), None);
        assert_eq!(restarted.start().unwrap(), Xid::new(2));
    }

    #[test]
    fn test_decisions_are_retained_across_restarts() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new());
        let cars = Voter::new("rm.cars", true);
        registry.bind_participant("rm.cars", cars.clone());

        let coordinator = open(&dir, &registry);
        let committed = coordinator.start().unwrap();
        coordinator.enlist(committed, "rm.cars").unwrap();
        coordinator.commit(committed).unwrap();
        let aborted = coordinator.start().unwrap();
        coordinator.abort(aborted, "test").unwrap();
        for _ in 0..10 {
            let xid = coordinator.start().unwrap();
            coordinator.commit(xid).unwrap();
        }
        drop(coordinator);

        let restarted = open(&dir, &registry);
        assert!(restarted.if_committed(committed).unwrap());
        assert!(!restarted.if_committed(aborted).unwrap());
        assert_eq!(
            restarted.enlist(committed, "rm.hotels").unwrap(),
            TransactionStatus::Committed
        );
        assert_eq!(
            restarted.enlist(aborted, "rm.hotels").unwrap(),
            TransactionStatus::Aborted
        );
    }
}
