//! Transaction coordinator for the travel reservation system
//!
//! Hands out transaction ids, tracks which participants joined each
//! transaction and drives two-phase commit across them. The decision is
//! persisted before phase 2 starts, and a restarted coordinator redrives every
//! decision some participant has not yet confirmed.

pub mod config;
pub mod coordinator;
pub mod log;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use log::{TransactionLog, TransactionRecord};
