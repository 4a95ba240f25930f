//! The travel records: flights, cars, hotels, customers and reservations

use super::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seats on a flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    pub flight_num: String,
    pub price: u32,
    pub num_seats: u32,
    pub num_avail: u32,
    #[serde(default)]
    pub deleted: bool,
}

impl Flight {
    pub fn new(flight_num: impl Into<String>, price: u32, num_seats: u32) -> Self {
        Self {
            flight_num: flight_num.into(),
            price,
            num_seats,
            num_avail: num_seats,
            deleted: false,
        }
    }
}

/// Rental cars at a location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub location: String,
    pub price: u32,
    pub num_cars: u32,
    pub num_avail: u32,
    #[serde(default)]
    pub deleted: bool,
}

impl Car {
    pub fn new(location: impl Into<String>, price: u32, num_cars: u32) -> Self {
        Self {
            location: location.into(),
            price,
            num_cars,
            num_avail: num_cars,
            deleted: false,
        }
    }
}

/// Hotel rooms at a location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotel {
    pub location: String,
    pub price: u32,
    pub num_rooms: u32,
    pub num_avail: u32,
    #[serde(default)]
    pub deleted: bool,
}

impl Hotel {
    pub fn new(location: impl Into<String>, price: u32, num_rooms: u32) -> Self {
        Self {
            location: location.into(),
            price,
            num_rooms,
            num_avail: num_rooms,
            deleted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub cust_name: String,
    #[serde(default)]
    pub deleted: bool,
}

impl Customer {
    pub fn new(cust_name: impl Into<String>) -> Self {
        Self {
            cust_name: cust_name.into(),
            deleted: false,
        }
    }
}

/// What a reservation holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationType {
    Flight,
    Hotel,
    Car,
}

impl fmt::Display for ReservationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationType::Flight => write!(f, "flight"),
            ReservationType::Hotel => write!(f, "hotel"),
            ReservationType::Car => write!(f, "car"),
        }
    }
}

/// A customer's hold on a flight seat, hotel room or car
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub cust_name: String,
    pub resv_type: ReservationType,
    /// Key of the reserved flight, hotel or car
    pub resv_key: String,
    #[serde(default)]
    pub deleted: bool,
}

impl Reservation {
    pub fn new(
        cust_name: impl Into<String>,
        resv_type: ReservationType,
        resv_key: impl Into<String>,
    ) -> Self {
        Self {
            cust_name: cust_name.into(),
            resv_type,
            resv_key: resv_key.into(),
            deleted: false,
        }
    }
}

macro_rules! impl_record {
    ($ty:ty, $resource:literal, |$this:ident| $key:expr) => {
        impl Record for $ty {
            const RESOURCE: &'static str = $resource;

            fn key(&self) -> String {
                let $this = self;
                $key
            }

            fn is_deleted(&self) -> bool {
                self.deleted
            }

            fn set_deleted(&mut self, deleted: bool) {
                self.deleted = deleted;
            }
        }
    };
}

impl_record!(Flight, "flights", |f| f.flight_num.clone());
impl_record!(Car, "cars", |c| c.location.clone());
impl_record!(Hotel, "hotels", |h| h.location.clone());
impl_record!(Customer, "customers", |c| c.cust_name.clone());
impl_record!(Reservation, "reservations", |r| format!(
    "{}/{}/{}",
    r.cust_name, r.resv_type, r.resv_key
));
