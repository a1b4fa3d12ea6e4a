//! Records held by the ticket store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConcertId, MemberId, Money, ReservationId, StoreError, TicketId};

macro_rules! status_strings {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Returns the stored representation of the status.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(StoreError::Decode(format!(
                        concat!("unknown ", stringify!($ty), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

/// Lifecycle status of a concert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConcertStatus {
    #[default]
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
}

status_strings!(ConcertStatus {
    Upcoming => "UPCOMING",
    Ongoing => "ONGOING",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

/// A concert with a fixed number of seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concert {
    pub id: ConcertId,
    pub title: String,
    pub venue: String,
    pub description: String,
    /// Fixed at creation.
    pub total_seats: u32,
    /// Seat pool counter; always equal to the number of AVAILABLE tickets.
    pub available_seats: u32,
    pub ticket_price: Money,
    pub status: ConcertStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Concert {
    /// A concert accepts reservations while it is upcoming and has not started.
    pub fn is_reservable(&self, now: DateTime<Utc>) -> bool {
        self.status == ConcertStatus::Upcoming && now < self.starts_at
    }
}

/// Input for creating a concert together with its ticket ledger.
#[derive(Debug, Clone)]
pub struct NewConcert {
    pub title: String,
    pub venue: String,
    pub description: String,
    pub total_seats: u32,
    pub ticket_price: Money,
    pub status: ConcertStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Status of a single seat record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    #[default]
    Available,
    Reserved,
    Sold,
    Cancelled,
}

status_strings!(TicketStatus {
    Available => "AVAILABLE",
    Reserved => "RESERVED",
    Sold => "SOLD",
    Cancelled => "CANCELLED",
});

/// An individually addressable seat.
///
/// `reservation_id` is a lookup-only back-reference. It is set exactly while
/// the ticket is RESERVED or SOLD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub concert_id: ConcertId,
    pub seat_number: u32,
    pub price: Money,
    pub status: TicketStatus,
    pub reservation_id: Option<ReservationId>,
}

/// Account status of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

status_strings!(MemberStatus {
    Active => "ACTIVE",
    Inactive => "INACTIVE",
    Suspended => "SUSPENDED",
});

/// A member who may hold reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub status: MemberStatus,
}

/// Input for registering a member.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub name: String,
    pub status: MemberStatus,
}

impl NewMember {
    /// An active member with the given display name.
    pub fn active(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: MemberStatus::Active,
        }
    }
}

/// Status of a reservation.
///
/// State transitions:
/// ```text
/// Pending ──confirm──► Confirmed ──cancel──► Cancelled
///    │
///    ├──cancel──► Cancelled
///    └──timeout─► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

status_strings!(ReservationStatus {
    Pending => "PENDING",
    Confirmed => "CONFIRMED",
    Cancelled => "CANCELLED",
    Expired => "EXPIRED",
});

impl ReservationStatus {
    /// Returns true if the reservation can be confirmed in this state.
    pub fn can_confirm(&self) -> bool {
        matches!(self, ReservationStatus::Pending)
    }

    /// Returns true if the reservation can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Pending | ReservationStatus::Confirmed
        )
    }

    /// Returns true if the sweeper may expire the reservation in this state.
    pub fn can_expire(&self) -> bool {
        matches!(self, ReservationStatus::Pending)
    }

    /// Returns true if this is a terminal state (seats have been given back).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Cancelled | ReservationStatus::Expired
        )
    }
}

/// A claim on one or more tickets of a single concert.
///
/// The ticket set and `total_amount` are fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    /// External-facing identifier.
    pub reservation_number: String,
    pub member_id: MemberId,
    pub concert_id: ConcertId,
    /// Claimed tickets in ascending seat order.
    pub tickets: Vec<TicketId>,
    pub ticket_count: u32,
    pub total_amount: Money,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Deadline for confirmation of a pending hold.
    pub expired_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Returns true once the hold deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Point-in-time view of a concert's seat pool and ticket ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub concert_id: ConcertId,
    pub title: String,
    pub total_seats: u32,
    pub available_seats: u32,
    pub available_tickets: u32,
}

impl InventorySnapshot {
    /// Pool counter matches the ledger and stays within bounds.
    pub fn is_consistent(&self) -> bool {
        self.available_seats == self.available_tickets && self.available_seats <= self.total_seats
    }
}
