//! Storage layer for partition state

mod accounts;
mod reservation;

pub use accounts::{AccountStore, PaymentDirection, PaymentRecord};
pub use reservation::{Reservation, ReservationManager, ReservationType};
