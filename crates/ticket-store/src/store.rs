use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Concert, ConcertId, InventorySnapshot, Member, MemberId, NewConcert, NewMember, Reservation,
    ReservationId, ReservationStatus, Result, Ticket, TicketId,
};

/// One atomic unit of work against a single concert.
///
/// Every mutation of the seat pool, the ticket ledger and the concert's
/// reservations goes through a unit of work. Nothing becomes visible to other
/// callers until [`commit`](UnitOfWork::commit) succeeds; dropping the unit
/// without committing rolls every change back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// The concert this unit of work is scoped to.
    fn concert_id(&self) -> ConcertId;

    /// Reads the concert as seen by this unit of work.
    async fn concert(&mut self) -> Result<Concert>;

    /// Seat pool: takes `count` seats if at least that many remain.
    ///
    /// `Ok(false)` is the sold-out outcome and leaves the pool untouched.
    async fn try_reserve_seats(&mut self, count: u32) -> Result<bool>;

    /// Seat pool: gives `count` seats back, capped at the concert's total.
    ///
    /// Returns how many seats were actually restored.
    async fn release_seats(&mut self, count: u32) -> Result<u32>;

    /// Ticket ledger: claims exactly `count` AVAILABLE tickets for `reservation`.
    ///
    /// Fails with [`StoreError::InsufficientTickets`](crate::StoreError::InsufficientTickets)
    /// without claiming anything if fewer are available.
    async fn claim_seats(&mut self, count: u32, reservation: ReservationId)
    -> Result<Vec<TicketId>>;

    /// Ticket ledger: returns tickets held by `reservation` to AVAILABLE.
    async fn release_tickets(&mut self, reservation: ReservationId, tickets: &[TicketId])
    -> Result<()>;

    /// Ticket ledger: moves tickets held by `reservation` from RESERVED to SOLD.
    async fn mark_sold(&mut self, reservation: ReservationId, tickets: &[TicketId]) -> Result<()>;

    /// Allocates an identity for a reservation about to be inserted.
    async fn next_reservation_id(&mut self) -> Result<ReservationId>;

    /// Persists a new reservation together with its ticket set.
    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    /// Loads a reservation of this concert and locks it for the rest of the unit.
    async fn reservation_for_update(&mut self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Moves a reservation from `from` to `to`.
    ///
    /// Returns `false` if the reservation was no longer in `from`.
    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Makes every change of this unit visible atomically.
    async fn commit(self) -> Result<()>;
}

/// Core trait for ticket store implementations.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// The unit-of-work type handed out by [`begin`](TicketStore::begin).
    type Tx: UnitOfWork + 'static;

    /// Short name of the backing storage, reported by health checks.
    fn backend(&self) -> &'static str;

    /// Opens a unit of work on one concert.
    ///
    /// Waiting for other writers of the same concert is bounded; running out
    /// of patience yields a retryable contention error.
    async fn begin(&self, concert_id: ConcertId) -> Result<Self::Tx>;

    /// Creates a concert and a ticket for each of its seats, numbered from 1.
    async fn create_concert(&self, concert: NewConcert) -> Result<Concert>;

    /// Loads a concert.
    async fn get_concert(&self, id: ConcertId) -> Result<Option<Concert>>;

    /// Lists all concerts ordered by id.
    async fn list_concerts(&self) -> Result<Vec<Concert>>;

    /// Registers a member.
    async fn create_member(&self, member: NewMember) -> Result<Member>;

    /// Loads a member.
    async fn get_member(&self, id: MemberId) -> Result<Option<Member>>;

    /// Loads a reservation by its internal id.
    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Loads a reservation by its external reservation number.
    async fn find_reservation_by_number(&self, number: &str) -> Result<Option<Reservation>>;

    /// Lists a member's reservations, oldest first.
    async fn reservations_for_member(&self, member: MemberId) -> Result<Vec<Reservation>>;

    /// Returns the tickets in a reservation's set, in seat order.
    async fn tickets_for_reservation(&self, id: ReservationId) -> Result<Vec<Ticket>>;

    /// Ids of PENDING reservations whose deadline is at or before `now`,
    /// earliest deadline first.
    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ReservationId>>;

    /// Reads a concert's pool counter and AVAILABLE ticket count together.
    async fn inventory_snapshot(&self, concert_id: ConcertId) -> Result<Option<InventorySnapshot>>;

    /// Removes every concert, member, ticket and reservation.
    async fn reset(&self) -> Result<()>;
}
