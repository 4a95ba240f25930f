//! Crash points for exercising the commit protocol
//!
//! Components check their configured die time at fixed protocol points and hand
//! control to a [`FaultInjector`] when it matches. Production wires in
//! [`ProcessExit`]; tests wire in [`SimulatedCrash`] so a crash only kills the
//! component, not the test process.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the coordinator dies during `commit`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorDieTime {
    #[default]
    Never,
    /// After every participant voted yes, before COMMITTED is persisted
    BeforeCommit,
    /// Right after COMMITTED is persisted, before phase 2 starts
    AfterCommit,
}

/// Where a participant dies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantDieTime {
    #[default]
    Never,
    /// Right after enlisting with the coordinator, before doing any work
    AfterEnlist,
    BeforePrepare,
    AfterPrepare,
    BeforeCommit,
    BeforeAbort,
}

impl fmt::Display for CoordinatorDieTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for ParticipantDieTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Terminates a component
pub trait FaultInjector: Send + Sync {
    /// Stop `component` at `point`.
    ///
    /// Implementations that simulate a crash return the error the dead
    /// component reports to its caller. [`ProcessExit`] never returns.
    fn halt(&self, component: &str, point: &str) -> Error;
}

/// Exits the process, the way a real crash would end it
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

impl FaultInjector for ProcessExit {
    fn halt(&self, component: &str, point: &str) -> Error {
        tracing::error!("[{}] Dying at {}", component, point);
        std::process::exit(1)
    }
}

/// Marks the component dead without touching the process
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedCrash;

impl FaultInjector for SimulatedCrash {
    fn halt(&self, component: &str, point: &str) -> Error {
        tracing::warn!("[{}] Simulated crash at {}", component, point);
        Error::Crashed {
            component: component.to_string(),
            point: point.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_crash_reports_point() {
        let err = SimulatedCrash.halt("rm.flights", &ParticipantDieTime::AfterEnlist.to_string());
        match err {
            Error::Crashed { component, point } => {
                assert_eq!(component, "rm.flights");
                assert_eq!(point, "AfterEnlist");
            }
            other => panic!("Expected crash, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_never_die() {
        assert_eq!(CoordinatorDieTime::default(), CoordinatorDieTime::Never);
        assert_eq!(ParticipantDieTime::default(), ParticipantDieTime::Never);
    }
}
