//! Reservation demo
//!
//! Books a trip across the five participants, then crashes the car rental
//! participant in the middle of phase 2 and lets its monitor pick up the
//! decision after a restart.
//!
//! Run with: cargo run --example reservation_demo

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use travel_common::{
    CoordinatorService, ParticipantDieTime, ParticipantService, Registry, SimulatedCrash, Xid,
};
use travel_coordinator::{Coordinator, CoordinatorConfig};
use travel_resource::{
    Car, Customer, Flight, Hotel, Monitor, Record, Reservation, ReservationType, ResourceConfig,
    ResourceManager, ResourceService, names,
};

/// Start a participant with its monitor and bind it under `name`
fn start_participant<R: Record>(
    dir: &std::path::Path,
    registry: &Arc<Registry>,
    name: &str,
) -> Result<(Arc<ResourceManager<R>>, Monitor), Box<dyn std::error::Error>> {
    let config = ResourceConfig::new(name, dir.join(name))
        .with_reconnect_backoff(Duration::from_millis(100))
        .with_monitor_interval(Duration::from_millis(100));
    let (participant, monitor) =
        ResourceManager::start(config, registry.clone(), Arc::new(SimulatedCrash))?;
    registry.bind_participant(name, participant.clone());
    Ok((participant, monitor))
}

fn reserve(
    xid: Xid,
    customer: &str,
    flights: &ResourceManager<Flight>,
    cars: &ResourceManager<Car>,
    reservations: &ResourceManager<Reservation>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(mut flight) = flights.query(xid, "flights", "1001")? else {
        return Err("flight 1001 is not offered".into());
    };
    flight.num_avail -= 1;
    flights.update(xid, "flights", "1001", flight)?;

    let Some(mut car) = cars.query(xid, "cars", "Shanghai")? else {
        return Err("no cars in Shanghai".into());
    };
    car.num_avail -= 1;
    cars.update(xid, "cars", "Shanghai", car)?;

    reservations.insert(
        xid,
        "reservations",
        Reservation::new(customer, ReservationType::Flight, "1001"),
    )?;
    reservations.insert(
        xid,
        "reservations",
        Reservation::new(customer, ReservationType::Car, "Shanghai"),
    )?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== Travel Reservation Demo ===\n");

    let dir = tempfile::tempdir()?;
    let registry = Arc::new(Registry::new());

    // 1. Coordinator and participants share one registry
    let coordinator = Arc::new(Coordinator::open(
        CoordinatorConfig::new(dir.path().join("coordinator")),
        registry.clone(),
        Arc::new(SimulatedCrash),
    )?);
    registry.bind_coordinator(coordinator.clone());

    let (flights, flights_monitor) =
        start_participant::<Flight>(dir.path(), &registry, names::FLIGHTS)?;
    let (cars, cars_monitor) = start_participant::<Car>(dir.path(), &registry, names::CARS)?;
    let (hotels, hotels_monitor) =
        start_participant::<Hotel>(dir.path(), &registry, names::HOTELS)?;
    let (customers, customers_monitor) =
        start_participant::<Customer>(dir.path(), &registry, names::CUSTOMERS)?;
    let (reservations, reservations_monitor) =
        start_participant::<Reservation>(dir.path(), &registry, names::RESERVATIONS)?;
    println!("✓ Started coordinator and 5 participants in {}", dir.path().display());

    // 2. Stock the inventory
    let xid = coordinator.start()?;
    flights.insert(xid, "flights", Flight::new("1001", 1000, 100))?;
    cars.insert(xid, "cars", Car::new("Shanghai", 30, 5))?;
    hotels.insert(xid, "hotels", Hotel::new("Shanghai", 300, 20))?;
    customers.insert(xid, "customers", Customer::new("alice"))?;
    coordinator.commit(xid)?;
    println!("✓ Inventory committed by transaction {}", xid);

    // 3. A booking whose car participant dies before it can commit
    let xid = coordinator.start()?;
    reserve(xid, "alice", &flights, &cars, &reservations)?;
    cars.set_die_time(ParticipantDieTime::BeforeCommit)?;
    coordinator.commit(xid)?;
    println!(
        "✓ Transaction {} committed; unconfirmed participants: {:?}",
        xid,
        coordinator.unconfirmed(xid)
    );

    // 4. Restart the car participant; its new monitor asks the coordinator
    cars_monitor.stop().await;
    let (cars, cars_monitor) = start_participant::<Car>(dir.path(), &registry, names::CARS)?;
    if !cars_monitor.wait_until_connected().await {
        return Err("car participant never reconnected".into());
    }
    println!("  cars restarted, pending transactions now {:?}", cars.pending());

    let flight = flights.table().get("1001").cloned();
    let car = cars.table().get("Shanghai").cloned();
    println!("✓ Flight 1001 after booking: {:?}", flight);
    println!("✓ Shanghai cars after recovery: {:?}", car);
    let booked = reservations.table();
    println!("✓ Reservations: {:?}", booked.keys().collect::<Vec<_>>());

    for monitor in [
        flights_monitor,
        cars_monitor,
        hotels_monitor,
        customers_monitor,
        reservations_monitor,
    ] {
        monitor.stop().await;
    }

    println!("\n=== Demo completed ===");
    Ok(())
}
