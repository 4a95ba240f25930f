//! Participant configuration

use std::path::PathBuf;
use std::time::Duration;

/// Default for [`ResourceConfig::lock_wait_timeout`]
pub const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a resource manager
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Name the participant enlists under (`rm.flights`, ...)
    pub name: String,

    /// Directory for main tables, shadow tables and the pending set
    pub data_dir: PathBuf,

    /// Pause between failed reconnect attempts
    pub reconnect_backoff: Duration,

    /// How often the monitor pings the coordinator
    pub monitor_interval: Duration,

    /// Give up on a blocked lock after this long; `None` waits for cycle detection only.
    ///
    /// One lock manager only sees the cycles inside its own participant. A
    /// cycle spanning two participants is broken by this timeout alone, which
    /// reports it as [`travel_common::Error::Deadlock`]. The same error is
    /// returned for a plain wait behind a writer that holds its lock longer
    /// than the timeout, so the value must sit well above the longest
    /// transaction a deployment expects. `None` never aborts a live waiter but
    /// leaves cross-participant cycles blocked until one side is aborted.
    pub lock_wait_timeout: Option<Duration>,
}

impl ResourceConfig {
    /// Create a new config with the given name and data directory
    pub fn new(name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            data_dir: data_dir.into(),
            reconnect_backoff: Duration::from_secs(1),
            monitor_interval: Duration::from_secs(1),
            lock_wait_timeout: Some(DEFAULT_LOCK_WAIT_TIMEOUT),
        }
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_lock_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }
}
