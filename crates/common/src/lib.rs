//! Shared types for the ticketing workspace.

mod clock;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use types::{ConcertId, MemberId, Money, ReservationId, TicketId};
