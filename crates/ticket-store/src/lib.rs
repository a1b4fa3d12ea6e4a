//! Persistence layer for the ticketing system.
//!
//! The two shared-mutation points of a concert live here:
//! - [`SeatPool`]: the per-concert counter of remaining sellable seats
//! - [`TicketLedger`]: the individually addressable seat records
//!
//! Both are only mutated through a [`UnitOfWork`] opened with
//! [`TicketStore::begin`], which either commits every change or none.

pub mod error;
pub mod ledger;
pub mod memory;
pub mod model;
pub mod pool;
pub mod postgres;
pub mod store;

pub use common::{ConcertId, MemberId, Money, ReservationId, TicketId};
pub use error::{Result, StoreError};
pub use ledger::{LedgerError, TicketLedger};
pub use memory::InMemoryTicketStore;
pub use model::{
    Concert, ConcertStatus, InventorySnapshot, Member, MemberStatus, NewConcert, NewMember,
    Reservation, ReservationStatus, Ticket, TicketStatus,
};
pub use pool::SeatPool;
pub use postgres::PostgresTicketStore;
pub use store::{TicketStore, UnitOfWork};
