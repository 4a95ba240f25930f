//! Crossed lock orders: one transaction is chosen as the victim, the other commits

mod common;

use common::Cluster;
use std::thread;
use std::time::Duration;
use travel_common::{CoordinatorService, Error, TransactionStatus, Xid};
use travel_resource::{Car, Flight, ResourceService};

fn seed(cluster: &Cluster) {
    let xid = cluster.coordinator.start().unwrap();
    cluster.flights.insert(xid, "flights", Flight::new("A", 100, 10)).unwrap();
    cluster.flights.insert(xid, "flights", Flight::new("B", 200, 20)).unwrap();
    cluster.coordinator.commit(xid).unwrap();
}

fn reprice(cluster: &Cluster, xid: Xid, key: &str, price: u32) -> travel_common::Result<bool> {
    let seats = if key == "A" { 10 } else { 20 };
    cluster.flights.update(xid, "flights", key, Flight::new(key, price, seats))
}

fn assert_victim(cluster: &Cluster, victim: Xid, err: Error) {
    assert!(matches!(err, Error::Deadlock { xid, .. } if xid == victim));
    assert_eq!(cluster.coordinator.status(victim), Some(TransactionStatus::Aborted));
    assert!(!cluster.flights.pending().contains(&victim));
    assert!(cluster.flights.locks_held_by(victim).is_empty());
}

#[test]
fn test_write_read_cycle() {
    let cluster = Cluster::new();
    seed(&cluster);
    let t1 = cluster.coordinator.start().unwrap();
    let t2 = cluster.coordinator.start().unwrap();

    assert!(reprice(&cluster, t1, "A", 111).unwrap());
    assert!(reprice(&cluster, t2, "B", 222).unwrap());

    thread::scope(|s| {
        let older = s.spawn(|| cluster.flights.query(t1, "flights", "B"));
        thread::sleep(Duration::from_millis(100));

        let err = cluster.flights.query(t2, "flights", "A").unwrap_err();
        assert_victim(&cluster, t2, err);

        let seen = older.join().unwrap().unwrap().unwrap();
        assert_eq!(seen.price, 200);
    });

    cluster.coordinator.commit(t1).unwrap();
    assert!(matches!(
        cluster.coordinator.commit(t2),
        Err(Error::InvalidTransaction { .. })
    ));

    let table = cluster.flights.table();
    assert_eq!(table.get("A").unwrap().price, 111);
    assert_eq!(table.get("B").unwrap().price, 200);
}

#[test]
fn test_read_read_write_write_upgrade() {
    let cluster = Cluster::new();
    seed(&cluster);
    let t1 = cluster.coordinator.start().unwrap();
    let t2 = cluster.coordinator.start().unwrap();

    assert!(cluster.flights.query(t1, "flights", "A").unwrap().is_some());
    assert!(cluster.flights.query(t2, "flights", "A").unwrap().is_some());

    thread::scope(|s| {
        let older = s.spawn(|| reprice(&cluster, t1, "A", 111));
        thread::sleep(Duration::from_millis(100));

        let err = reprice(&cluster, t2, "A", 222).unwrap_err();
        assert_victim(&cluster, t2, err);

        assert!(older.join().unwrap().unwrap());
    });

    cluster.coordinator.commit(t1).unwrap();
    assert_eq!(cluster.flights.table().get("A").unwrap().price, 111);
}

#[test]
fn test_victim_can_retry_under_new_transaction() {
    let cluster = Cluster::new();
    seed(&cluster);
    let t1 = cluster.coordinator.start().unwrap();
    let t2 = cluster.coordinator.start().unwrap();

    assert!(reprice(&cluster, t1, "A", 111).unwrap());
    assert!(reprice(&cluster, t2, "B", 222).unwrap());

    thread::scope(|s| {
        let older = s.spawn(|| reprice(&cluster, t1, "B", 333));
        thread::sleep(Duration::from_millis(100));
        assert!(reprice(&cluster, t2, "A", 444).is_err());
        assert!(older.join().unwrap().unwrap());
    });
    cluster.coordinator.commit(t1).unwrap();

    let retry = cluster.coordinator.start().unwrap();
    assert!(reprice(&cluster, retry, "A", 444).unwrap());
    cluster.coordinator.commit(retry).unwrap();

    let table = cluster.flights.table();
    assert_eq!(table.get("A").unwrap().price, 444);
    assert_eq!(table.get("B").unwrap().price, 333);
}

fn reprice_car(cluster: &Cluster, xid: Xid, price: u32) -> travel_common::Result<bool> {
    cluster.cars.update(xid, "cars", "Shanghai", Car::new("Shanghai", price, 5))
}

/// Flights and cars each see half of the cycle; only the wait timeout breaks it
#[test]
fn test_cycle_across_participants() {
    let cluster = Cluster::with_lock_wait_timeout(Duration::from_secs(1));
    seed(&cluster);
    let setup = cluster.coordinator.start().unwrap();
    cluster.cars.insert(setup, "cars", Car::new("Shanghai", 30, 5)).unwrap();
    cluster.coordinator.commit(setup).unwrap();

    let t1 = cluster.coordinator.start().unwrap();
    let t2 = cluster.coordinator.start().unwrap();
    assert!(reprice(&cluster, t1, "A", 111).unwrap());
    assert!(reprice_car(&cluster, t2, 99).unwrap());

    let (first, second) = thread::scope(|s| {
        let older = s.spawn(|| reprice_car(&cluster, t1, 33));
        thread::sleep(Duration::from_millis(300));
        let younger = reprice(&cluster, t2, "A", 222);
        (older.join().unwrap(), younger)
    });

    let (victim, survivor, err) = match (first, second) {
        (Err(err), Ok(true)) => (t1, t2, err),
        (Ok(true), Err(err)) => (t2, t1, err),
        other => panic!("Expected exactly one deadlock victim, got {:?}", other),
    };
    assert!(matches!(err, Error::Deadlock { xid, .. } if xid == victim));
    assert_eq!(cluster.coordinator.status(victim), Some(TransactionStatus::Aborted));
    assert!(cluster.cars.locks_held_by(victim).is_empty());
    assert!(cluster.flights.locks_held_by(victim).is_empty());

    cluster.coordinator.commit(survivor).unwrap();
    assert!(cluster.coordinator.if_committed(survivor).unwrap());
    assert!(!cluster.coordinator.if_committed(victim).unwrap());

    // Final state is the survivor's work alone
    let (flight_price, car_price) = if survivor == t1 { (111, 33) } else { (222, 99) };
    assert_eq!(cluster.flights.table().get("A").unwrap().price, flight_price);
    assert_eq!(cluster.flights.table().get("B").unwrap().price, 200);
    assert_eq!(cluster.cars.table().get("Shanghai").unwrap().price, car_price);
    assert!(cluster.flights.pending().is_empty());
    assert!(cluster.cars.pending().is_empty());
}
