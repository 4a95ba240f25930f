//! In-process naming service
//!
//! Binds the coordinator and participants by name. Entries are held weakly: once
//! a component is dropped it is gone, exactly like a process that exited, and
//! lookups report it as unavailable. Rebinding a name replaces the old entry,
//! which is how a restarted component takes over.

use crate::rpc::{CoordinatorLink, CoordinatorService, ParticipantDirectory, ParticipantService};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Name used for the coordinator binding
const COORDINATOR: &str = "coordinator";

/// Registry of live components
#[derive(Default)]
pub struct Registry {
    coordinator: RwLock<Option<Weak<dyn CoordinatorService>>>,
    participants: RwLock<HashMap<String, Weak<dyn ParticipantService>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind (or rebind) the coordinator
    pub fn bind_coordinator(&self, coordinator: Arc<dyn CoordinatorService>) {
        *self.coordinator.write() = Some(Arc::downgrade(&coordinator));
    }

    pub fn unbind_coordinator(&self) {
        *self.coordinator.write() = None;
    }

    /// Bind (or rebind) a participant under `name`
    pub fn bind_participant(&self, name: impl Into<String>, participant: Arc<dyn ParticipantService>) {
        self.participants
            .write()
            .insert(name.into(), Arc::downgrade(&participant));
    }

    pub fn unbind_participant(&self, name: &str) {
        self.participants.write().remove(name);
    }
}

impl CoordinatorLink for Registry {
    fn coordinator(&self) -> Result<Arc<dyn CoordinatorService>> {
        self.coordinator
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::unavailable(COORDINATOR, "not bound"))
    }
}

impl ParticipantDirectory for Registry {
    fn participant(&self, name: &str) -> Result<Arc<dyn ParticipantService>> {
        self.participants
            .read()
            .get(name)
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::unavailable(name, "not bound"))
    }
}
