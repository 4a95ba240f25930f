//! Common types for the travel reservation transaction system
//!
//! This crate defines:
//! - Transaction ids and the coordinator's status model
//! - The error taxonomy every caller above the coordinator/participant boundary sees
//! - Fault-injection points and the seam that turns them into crashes
//! - Service traits for the coordinator and participants, plus an in-process registry

mod error;
mod fault;
mod registry;
mod rpc;
mod status;
mod transaction_id;

pub use error::{Error, Result};
pub use fault::{CoordinatorDieTime, FaultInjector, ParticipantDieTime, ProcessExit, SimulatedCrash};
pub use registry::Registry;
pub use rpc::{CoordinatorLink, CoordinatorService, ParticipantDirectory, ParticipantService};
pub use status::TransactionStatus;
pub use transaction_id::Xid;
