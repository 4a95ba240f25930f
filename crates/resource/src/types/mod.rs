//! Record types managed by participants

mod record;
mod travel;

pub use record::Record;
pub use travel::{Car, Customer, Flight, Hotel, Reservation, ReservationType};
