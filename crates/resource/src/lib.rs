//! Resource managers for the travel reservation system
//!
//! A resource manager is a two-phase commit participant owning one record
//! type (flights, cars, hotels, customers or reservations). Each keeps:
//! - A committed main table, persisted whole on every commit
//! - One shadow table per open transaction, persisted on every write
//! - A durable set of transactions it still has to resolve
//! - Key-level locks through a [`travel_lock::LockManager`]
//!
//! A background [`Monitor`] keeps the participant connected to the coordinator
//! and re-enlists open transactions after either side restarts.

pub mod config;
pub mod manager;
pub mod monitor;
pub mod service;
pub mod storage;
pub mod types;

pub use config::ResourceConfig;
pub use manager::ResourceManager;
pub use monitor::Monitor;
pub use service::ResourceService;
pub use storage::{ShadowTable, Table};
pub use types::{Car, Customer, Flight, Hotel, Record, Reservation, ReservationType};

/// Canonical participant names
pub mod names {
    pub const FLIGHTS: &str = "rm.flights";
    pub const CARS: &str = "rm.cars";
    pub const HOTELS: &str = "rm.hotels";
    pub const CUSTOMERS: &str = "rm.customers";
    pub const RESERVATIONS: &str = "rm.reservations";
}
