//! Reservation error types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use ticket_store::{
    ConcertId, ConcertStatus, MemberId, MemberStatus, ReservationId, ReservationStatus, StoreError,
};

/// Coarse outcome class of a rejected operation, independent of transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    /// Not enough seats left. A normal business outcome.
    Capacity,
    /// Unknown concert, member or reservation.
    NotFound,
    /// The request is valid in shape but not in the current state.
    InvalidState,
    /// The reservation already left the state the operation needs.
    Conflict,
    /// Lock wait or retry budget exhausted; worth retrying later.
    Contention,
    /// Storage failure or broken invariant.
    Internal,
}

impl RejectionCategory {
    /// Label used for the `reason` dimension of rejection metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCategory::Capacity => "capacity",
            RejectionCategory::NotFound => "not_found",
            RejectionCategory::InvalidState => "unavailable",
            RejectionCategory::Conflict => "conflict",
            RejectionCategory::Contention => "contention",
            RejectionCategory::Internal => "internal",
        }
    }
}

/// Errors that can occur during reservation operations.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// Fewer seats remain than were requested.
    #[error("Concert {concert_id} has {available} seats left, {requested} requested")]
    CapacityExhausted {
        concert_id: ConcertId,
        requested: u32,
        available: u32,
    },

    #[error("Concert not found: {0}")]
    ConcertNotFound(ConcertId),

    #[error("Member not found: {0}")]
    MemberNotFound(MemberId),

    #[error("Member {member_id} is {status}")]
    MemberNotActive {
        member_id: MemberId,
        status: MemberStatus,
    },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// Reservation number lookup missed.
    #[error("Reservation not found: {0}")]
    ReservationNumberNotFound(String),

    /// The concert is not UPCOMING or has already started.
    #[error("Concert {concert_id} is not open for reservation ({status})")]
    ConcertNotAvailable {
        concert_id: ConcertId,
        status: ConcertStatus,
    },

    /// The reservation is not in a state the action applies to.
    #[error("Cannot {action} reservation {reservation_id} in state {status}")]
    InvalidTransition {
        reservation_id: ReservationId,
        status: ReservationStatus,
        action: &'static str,
    },

    /// Confirmation came after the hold deadline.
    #[error("Hold on reservation {reservation_id} expired at {expired_at}")]
    HoldExpired {
        reservation_id: ReservationId,
        expired_at: DateTime<Utc>,
    },

    /// Bounded retries were used up.
    #[error("Concert {concert_id} is busy, gave up after {attempts} attempts")]
    Contention { concert_id: ConcertId, attempts: u32 },

    #[error("Ticket count must be between 1 and {max}, got {requested}")]
    InvalidCount { requested: u32, max: u32 },

    /// Pool and ledger disagree, or a stored record is malformed.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl ReservationError {
    /// Returns the transport-independent category of this error.
    pub fn category(&self) -> RejectionCategory {
        match self {
            ReservationError::CapacityExhausted { .. } => RejectionCategory::Capacity,
            ReservationError::ConcertNotFound(_)
            | ReservationError::MemberNotFound(_)
            | ReservationError::ReservationNotFound(_)
            | ReservationError::ReservationNumberNotFound(_) => RejectionCategory::NotFound,
            ReservationError::MemberNotActive { .. }
            | ReservationError::ConcertNotAvailable { .. }
            | ReservationError::HoldExpired { .. }
            | ReservationError::InvalidCount { .. } => RejectionCategory::InvalidState,
            ReservationError::InvalidTransition { .. } => RejectionCategory::Conflict,
            ReservationError::Contention { .. } => RejectionCategory::Contention,
            ReservationError::Store(e) if e.is_retryable() => RejectionCategory::Contention,
            ReservationError::Invariant(_) | ReservationError::Store(_) => {
                RejectionCategory::Internal
            }
        }
    }

    /// Returns true if running the same unit of work again may succeed.
    ///
    /// A reservation number collision is retryable since a fresh number is
    /// drawn on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReservationError::Store(e) => {
                e.is_retryable() || matches!(e, StoreError::DuplicateReservationNumber(_))
            }
            _ => false,
        }
    }
}

impl From<StoreError> for ReservationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConcertNotFound(id) => ReservationError::ConcertNotFound(id),
            StoreError::ReservationNotFound(id) => ReservationError::ReservationNotFound(id),
            StoreError::Invariant(detail) => ReservationError::Invariant(detail),
            StoreError::InsufficientTickets {
                requested,
                available,
            } => ReservationError::Invariant(format!(
                "ledger has {available} available tickets, {requested} requested"
            )),
            other => ReservationError::Store(other),
        }
    }
}
