//! Reservation lifecycle for the ticketing system.
//!
//! This crate composes the seat pool and ticket ledger of
//! [`ticket_store`] into reservations:
//! - [`ReservationService`]: reserve, confirm, cancel and expire
//! - [`ReservationError`] and its transport-independent [`RejectionCategory`]
//! - [`InventoryAudit`]: pool counter vs. ledger consistency reports

pub mod audit;
pub mod config;
pub mod error;
pub mod number;
pub mod retry;
pub mod service;

pub use audit::{InventoryAudit, InventoryReport};
pub use config::ReservationConfig;
pub use error::{RejectionCategory, ReservationError};
pub use retry::RetryPolicy;
pub use service::ReservationService;
