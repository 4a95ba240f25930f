//! Cluster fixture: a coordinator and the five participants in one process

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use travel_common::{Registry, SimulatedCrash};
use travel_coordinator::{Coordinator, CoordinatorConfig};
use travel_resource::{
    Car, Customer, Flight, Hotel, Record, Reservation, ResourceConfig, ResourceManager, names,
};

pub struct Cluster {
    pub lock_wait_timeout: Duration,
    pub dir: TempDir,
    pub registry: Arc<Registry>,
    pub coordinator: Arc<Coordinator>,
    pub flights: Arc<ResourceManager<Flight>>,
    pub cars: Arc<ResourceManager<Car>>,
    pub hotels: Arc<ResourceManager<Hotel>>,
    pub customers: Arc<ResourceManager<Customer>>,
    pub reservations: Arc<ResourceManager<Reservation>>,
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_lock_wait_timeout(Duration::from_secs(5))
    }

    /// Cluster whose participants give up on a blocked lock after `timeout`
    pub fn with_lock_wait_timeout(timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new());

        let coordinator = open_coordinator(&dir, &registry);
        let flights = open_participant(&dir, &registry, names::FLIGHTS, timeout);
        let cars = open_participant(&dir, &registry, names::CARS, timeout);
        let hotels = open_participant(&dir, &registry, names::HOTELS, timeout);
        let customers = open_participant(&dir, &registry, names::CUSTOMERS, timeout);
        let reservations = open_participant(&dir, &registry, names::RESERVATIONS, timeout);

        Self {
            lock_wait_timeout: timeout,
            dir,
            registry,
            coordinator,
            flights,
            cars,
            hotels,
            customers,
            reservations,
        }
    }

    /// Replace the coordinator with a fresh one over the same log
    pub fn restart_coordinator(&mut self) {
        self.coordinator = open_coordinator(&self.dir, &self.registry);
    }

    pub fn restart_flights(&mut self) {
        self.flights = open_participant(&self.dir, &self.registry, names::FLIGHTS, self.lock_wait_timeout);
    }

    pub fn restart_cars(&mut self) {
        self.cars = open_participant(&self.dir, &self.registry, names::CARS, self.lock_wait_timeout);
    }

    pub fn restart_hotels(&mut self) {
        self.hotels = open_participant(&self.dir, &self.registry, names::HOTELS, self.lock_wait_timeout);
    }

    pub fn data_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn open_coordinator(dir: &TempDir, registry: &Arc<Registry>) -> Arc<Coordinator> {
    let config = CoordinatorConfig::new(dir.path().join("coordinator"));
    let coordinator = Arc::new(
        Coordinator::open(config, registry.clone(), Arc::new(SimulatedCrash)).unwrap(),
    );
    registry.bind_coordinator(coordinator.clone());
    coordinator
}

pub fn open_participant<R: Record>(
    dir: &TempDir,
    registry: &Arc<Registry>,
    name: &str,
    lock_wait_timeout: Duration,
) -> Arc<ResourceManager<R>> {
    let config = ResourceConfig::new(name, dir.path().join(name))
        .with_lock_wait_timeout(Some(lock_wait_timeout))
        .with_reconnect_backoff(Duration::from_millis(20))
        .with_monitor_interval(Duration::from_millis(20));
    let participant = Arc::new(
        ResourceManager::open(config, registry.clone(), Arc::new(SimulatedCrash)).unwrap(),
    );
    registry.bind_participant(name, participant.clone());
    participant
}
