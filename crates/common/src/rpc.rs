//! Service surfaces of the coordinator and the participants
//!
//! These traits are the transport-agnostic RPC boundary. Every call may fail with
//! a communication error; callers never see anything beyond [`crate::Error`].
//! Participants identify themselves to the coordinator by name, and the coordinator
//! opens its own handle back through a [`ParticipantDirectory`].

use crate::{CoordinatorDieTime, ParticipantDieTime, Result, TransactionStatus, Xid};
use std::sync::Arc;

/// Transaction coordinator driving two-phase commit
pub trait CoordinatorService: Send + Sync {
    /// Allocate a new transaction id
    fn start(&self) -> Result<Xid>;

    /// Register `participant` under `xid` and report the transaction's status.
    ///
    /// A terminal status tells a late participant the decision it must apply.
    fn enlist(&self, xid: Xid, participant: &str) -> Result<TransactionStatus>;

    /// Run two-phase commit over every enlisted participant
    fn commit(&self, xid: Xid) -> Result<()>;

    /// Abort the transaction on every enlisted participant
    fn abort(&self, xid: Xid, reason: &str) -> Result<()>;

    /// Whether the retained status of `xid` is COMMITTED
    fn if_committed(&self, xid: Xid) -> Result<bool>;

    fn test_connection(&self) -> Result<bool>;

    fn set_die_time(&self, die_time: CoordinatorDieTime) -> Result<()>;

    /// Crash immediately; only ever returns an error
    fn die_now(&self) -> Result<()>;
}

/// Participant side of two-phase commit
pub trait ParticipantService: Send + Sync {
    /// Name the participant enlists under
    fn name(&self) -> Result<String>;

    fn test_connection(&self) -> Result<bool>;

    /// Phase 1 vote
    fn prepare(&self, xid: Xid) -> Result<bool>;

    /// Phase 2 commit; a no-op for a transaction already committed here
    fn commit(&self, xid: Xid) -> Result<()>;

    /// Discard the transaction's work
    fn abort(&self, xid: Xid) -> Result<()>;

    fn set_die_time(&self, die_time: ParticipantDieTime) -> Result<()>;

    /// Crash immediately; only ever returns an error
    fn die_now(&self) -> Result<()>;
}

/// How a participant reaches the coordinator
pub trait CoordinatorLink: Send + Sync {
    fn coordinator(&self) -> Result<Arc<dyn CoordinatorService>>;
}

/// How the coordinator reaches an enlisted participant by name
pub trait ParticipantDirectory: Send + Sync {
    fn participant(&self, name: &str) -> Result<Arc<dyn ParticipantService>>;
}
