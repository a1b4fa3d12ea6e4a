//! Reservation lifecycle service.
//!
//! Every operation runs as one [`UnitOfWork`] on the reservation's concert:
//! pool, ledger and reservation record change together or not at all.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use common::{Clock, SystemClock};
use ticket_store::{
    Concert, ConcertId, MemberId, MemberStatus, Reservation, ReservationId, ReservationStatus,
    StoreError, Ticket, TicketStore, UnitOfWork,
};

use crate::{RejectionCategory, ReservationConfig, ReservationError, number};

type Result<T> = std::result::Result<T, ReservationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Confirm,
    Cancel,
    Expire,
}

impl Transition {
    fn name(self) -> &'static str {
        match self {
            Transition::Confirm => "confirm",
            Transition::Cancel => "cancel",
            Transition::Expire => "expire",
        }
    }

    fn target(self) -> ReservationStatus {
        match self {
            Transition::Confirm => ReservationStatus::Confirmed,
            Transition::Cancel => ReservationStatus::Cancelled,
            Transition::Expire => ReservationStatus::Expired,
        }
    }

    fn allowed_from(self, status: ReservationStatus) -> bool {
        match self {
            Transition::Confirm => status.can_confirm(),
            Transition::Cancel => status.can_cancel(),
            Transition::Expire => status.can_expire(),
        }
    }
}

/// Service for reserving seats and driving reservations through their lifecycle.
///
/// ```text
/// PENDING ──confirm──► CONFIRMED
///    │                     │
///    ├──cancel──► CANCELLED ◄──cancel
///    └──expire──► EXPIRED
/// ```
#[derive(Clone)]
pub struct ReservationService<S> {
    store: S,
    clock: Arc<dyn Clock>,
    config: ReservationConfig,
}

impl<S: TicketStore> ReservationService<S> {
    /// Creates a new service with the default configuration and wall-clock time.
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config: ReservationConfig::default(),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: ReservationConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// Returns the time source used for holds and deadlines.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Reserves `count` seats of a concert for a member.
    ///
    /// On success the reservation is PENDING, its tickets are RESERVED and
    /// the hold lasts until `expired_at`. Sold-out and unavailable concerts
    /// are reported as rejections and leave no trace.
    #[tracing::instrument(skip(self), fields(reservation_id))]
    pub async fn reserve(
        &self,
        member_id: MemberId,
        concert_id: ConcertId,
        count: u32,
    ) -> Result<Reservation> {
        let started = Instant::now();
        let outcome = self.reserve_checked(member_id, concert_id, count).await;
        metrics::histogram!("reservation_duration_seconds").record(started.elapsed().as_secs_f64());

        match &outcome {
            Ok(reservation) => {
                tracing::Span::current().record("reservation_id", reservation.id.as_i64());
                metrics::counter!("reservations_created_total").increment(1);
                tracing::info!(
                    reservation_number = %reservation.reservation_number,
                    tickets = reservation.ticket_count,
                    total = %reservation.total_amount,
                    "reservation created"
                );
            }
            Err(e) => {
                metrics::counter!("reservations_rejected_total", "reason" => e.category().as_str())
                    .increment(1);
                log_rejection("reserve", e);
            }
        }
        outcome
    }

    /// Confirms a PENDING reservation before its deadline; its tickets become SOLD.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.run_transition(reservation_id, Transition::Confirm).await
    }

    /// Cancels a PENDING or CONFIRMED reservation and returns its seats.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.run_transition(reservation_id, Transition::Cancel).await
    }

    /// Expires a PENDING reservation whose deadline has passed and returns its seats.
    ///
    /// Called by the sweeper. A reservation that was confirmed or cancelled
    /// first yields [`ReservationError::InvalidTransition`].
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.run_transition(reservation_id, Transition::Expire).await
    }

    /// Loads a reservation.
    pub async fn get_reservation(&self, id: ReservationId) -> Result<Reservation> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or(ReservationError::ReservationNotFound(id))
    }

    /// Loads a reservation by its external number.
    pub async fn find_by_number(&self, number: &str) -> Result<Reservation> {
        self.store
            .find_reservation_by_number(number)
            .await?
            .ok_or_else(|| ReservationError::ReservationNumberNotFound(number.to_owned()))
    }

    /// Lists a member's reservations, oldest first.
    pub async fn list_for_member(&self, member_id: MemberId) -> Result<Vec<Reservation>> {
        if self.store.get_member(member_id).await?.is_none() {
            return Err(ReservationError::MemberNotFound(member_id));
        }
        Ok(self.store.reservations_for_member(member_id).await?)
    }

    /// Returns the tickets held by a reservation, in seat order.
    pub async fn tickets_of(&self, reservation_id: ReservationId) -> Result<Vec<Ticket>> {
        Ok(self.store.tickets_for_reservation(reservation_id).await?)
    }

    /// Loads a concert.
    pub async fn concert(&self, concert_id: ConcertId) -> Result<Concert> {
        self.store
            .get_concert(concert_id)
            .await?
            .ok_or(ReservationError::ConcertNotFound(concert_id))
    }

    async fn reserve_checked(
        &self,
        member_id: MemberId,
        concert_id: ConcertId,
        count: u32,
    ) -> Result<Reservation> {
        let max = self.config.max_tickets_per_reservation;
        if count == 0 || count > max {
            return Err(ReservationError::InvalidCount {
                requested: count,
                max,
            });
        }

        let member = self
            .store
            .get_member(member_id)
            .await?
            .ok_or(ReservationError::MemberNotFound(member_id))?;
        if member.status != MemberStatus::Active {
            return Err(ReservationError::MemberNotActive {
                member_id,
                status: member.status,
            });
        }

        self.with_retry(concert_id, move || self.reserve_once(member_id, concert_id, count))
            .await
    }

    async fn reserve_once(
        &self,
        member_id: MemberId,
        concert_id: ConcertId,
        count: u32,
    ) -> Result<Reservation> {
        let mut tx = self.store.begin(concert_id).await?;
        let concert = tx.concert().await?;
        let now = self.clock.now();

        if !concert.is_reservable(now) {
            return Err(ReservationError::ConcertNotAvailable {
                concert_id,
                status: concert.status,
            });
        }

        if !tx.try_reserve_seats(count).await? {
            return Err(ReservationError::CapacityExhausted {
                concert_id,
                requested: count,
                available: concert.available_seats,
            });
        }

        let id = tx.next_reservation_id().await?;
        let tickets = match tx.claim_seats(count, id).await {
            Ok(tickets) => tickets,
            Err(StoreError::InsufficientTickets {
                requested,
                available,
            }) => {
                // Dropping `tx` gives the seats back to the pool.
                tracing::error!(
                    %concert_id,
                    requested,
                    available,
                    "seat pool granted seats the ticket ledger cannot supply"
                );
                return Err(ReservationError::Invariant(format!(
                    "concert {concert_id}: pool granted {requested} seats, ledger has {available}"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let total_amount = concert.ticket_price.checked_times(count).ok_or_else(|| {
            ReservationError::Invariant(format!(
                "total for {count} x {} overflows",
                concert.ticket_price
            ))
        })?;

        let reservation = Reservation {
            id,
            reservation_number: number::generate(now),
            member_id,
            concert_id,
            ticket_count: count,
            tickets,
            total_amount,
            status: ReservationStatus::Pending,
            created_at: now,
            updated_at: now,
            expired_at: Some(now + self.config.hold_window),
        };
        tx.insert_reservation(&reservation).await?;
        tx.commit().await?;

        Ok(reservation)
    }

    async fn run_transition(
        &self,
        reservation_id: ReservationId,
        transition: Transition,
    ) -> Result<Reservation> {
        let outcome = self.transition(reservation_id, transition).await;
        match &outcome {
            Ok(reservation) => {
                match transition {
                    Transition::Confirm => {
                        metrics::counter!("reservations_confirmed_total").increment(1)
                    }
                    Transition::Cancel => {
                        metrics::counter!("reservations_cancelled_total").increment(1)
                    }
                    Transition::Expire => {
                        metrics::counter!("reservations_expired_total").increment(1)
                    }
                }
                tracing::info!(
                    reservation_id = %reservation.id,
                    concert_id = %reservation.concert_id,
                    status = %reservation.status,
                    "reservation {}", transition.target().as_str().to_lowercase()
                );
            }
            Err(e) => log_rejection(transition.name(), e),
        }
        outcome
    }

    async fn transition(
        &self,
        reservation_id: ReservationId,
        transition: Transition,
    ) -> Result<Reservation> {
        // Only used to find the concert; the state is re-read under its lock.
        let concert_id = self.get_reservation(reservation_id).await?.concert_id;
        self.with_retry(concert_id, move || {
            self.transition_once(concert_id, reservation_id, transition)
        })
        .await
    }

    async fn transition_once(
        &self,
        concert_id: ConcertId,
        reservation_id: ReservationId,
        transition: Transition,
    ) -> Result<Reservation> {
        let mut tx = self.store.begin(concert_id).await?;
        let mut reservation = tx
            .reservation_for_update(reservation_id)
            .await?
            .ok_or(ReservationError::ReservationNotFound(reservation_id))?;
        let now = self.clock.now();
        let from = reservation.status;

        let invalid = || ReservationError::InvalidTransition {
            reservation_id,
            status: from,
            action: transition.name(),
        };
        if !transition.allowed_from(from) {
            return Err(invalid());
        }

        match transition {
            Transition::Confirm => {
                if reservation.is_expired(now) {
                    return Err(ReservationError::HoldExpired {
                        reservation_id,
                        expired_at: reservation.expired_at.unwrap_or(now),
                    });
                }
                tx.mark_sold(reservation_id, &reservation.tickets).await?;
            }
            Transition::Cancel => release_holdings(&mut tx, &reservation).await?,
            Transition::Expire => {
                if !reservation.is_expired(now) {
                    return Err(invalid());
                }
                release_holdings(&mut tx, &reservation).await?;
            }
        }

        let target = transition.target();
        if !tx
            .update_reservation_status(reservation_id, from, target, now)
            .await?
        {
            return Err(invalid());
        }
        tx.commit().await?;

        reservation.status = target;
        reservation.updated_at = now;
        Ok(reservation)
    }

    /// Runs `op` and reruns it on retryable failures, at most
    /// `max_retries` more times.
    async fn with_retry<T, F, Fut>(&self, concert_id: ConcertId, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = &self.config.retry;
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_retryable() => {
                    if attempt >= policy.max_retries {
                        return Err(ReservationError::Contention {
                            concert_id,
                            attempts: attempt + 1,
                        });
                    }
                    let delay = policy.delay_for_attempt(attempt);
                    attempt += 1;
                    metrics::counter!("reservation_retries_total").increment(1);
                    tracing::debug!(%concert_id, attempt, ?delay, error = %e, "retrying unit of work");
                    tokio::time::sleep(delay).await;
                }
                outcome => return outcome,
            }
        }
    }
}

/// Returns a reservation's tickets to AVAILABLE and its count to the seat pool.
async fn release_holdings<U: UnitOfWork>(tx: &mut U, reservation: &Reservation) -> Result<()> {
    tx.release_tickets(reservation.id, &reservation.tickets)
        .await?;
    let restored = tx.release_seats(reservation.ticket_count).await?;
    if restored != reservation.ticket_count {
        tracing::error!(
            reservation_id = %reservation.id,
            concert_id = %reservation.concert_id,
            expected = reservation.ticket_count,
            restored,
            "seat pool refused part of a release"
        );
        return Err(ReservationError::Invariant(format!(
            "releasing reservation {} restored {restored} of {} seats",
            reservation.id, reservation.ticket_count
        )));
    }
    Ok(())
}

fn log_rejection(operation: &'static str, e: &ReservationError) {
    match e.category() {
        RejectionCategory::Capacity
        | RejectionCategory::NotFound
        | RejectionCategory::InvalidState
        | RejectionCategory::Conflict => {
            tracing::debug!(operation, error = %e, "rejected");
        }
        RejectionCategory::Contention => tracing::warn!(operation, error = %e, "contention"),
        RejectionCategory::Internal => tracing::error!(operation, error = %e, "failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::ManualClock;
    use ticket_store::{
        ConcertStatus, InMemoryTicketStore, Money, NewConcert, NewMember, TicketStatus,
    };

    struct Fixture {
        service: ReservationService<InMemoryTicketStore>,
        clock: ManualClock,
        concert_id: ConcertId,
        member_id: MemberId,
    }

    async fn fixture(seats: u32) -> Fixture {
        let clock = ManualClock::default();
        let store = InMemoryTicketStore::new();
        let starts_at = clock.now() + Duration::days(7);
        let concert = store
            .create_concert(NewConcert {
                title: "Autumn Festival".into(),
                venue: "Main Stage".into(),
                description: String::new(),
                total_seats: seats,
                ticket_price: Money::from_cents(5_000),
                status: ConcertStatus::Upcoming,
                starts_at,
                ends_at: starts_at + Duration::hours(3),
            })
            .await
            .unwrap();
        let member = store
            .create_member(NewMember::active("member001"))
            .await
            .unwrap();
        let service = ReservationService::new(store).with_clock(Arc::new(clock.clone()));

        Fixture {
            service,
            clock,
            concert_id: concert.id,
            member_id: member.id,
        }
    }

    async fn available(f: &Fixture) -> (u32, u32) {
        let snapshot = f
            .service
            .store()
            .inventory_snapshot(f.concert_id)
            .await
            .unwrap()
            .unwrap();
        (snapshot.available_seats, snapshot.available_tickets)
    }

    #[tokio::test]
    async fn reserve_holds_seats_with_deadline() {
        let f = fixture(10).await;
        let now = f.clock.now();

        let r = f.service.reserve(f.member_id, f.concert_id, 3).await.unwrap();

        assert_eq!(r.status, ReservationStatus::Pending);
        assert_eq!(r.ticket_count, 3);
        assert_eq!(r.tickets.len(), 3);
        assert_eq!(r.total_amount, Money::from_cents(15_000));
        assert_eq!(r.expired_at, Some(now + Duration::minutes(5)));
        assert!(r.reservation_number.starts_with("RSV-"));
        assert_eq!(available(&f).await, (7, 7));

        let tickets = f.service.tickets_of(r.id).await.unwrap();
        assert!(tickets.iter().all(|t| t.status == TicketStatus::Reserved));
    }

    #[tokio::test]
    async fn reserve_rejects_bad_counts() {
        let f = fixture(10).await;

        for count in [0, 5] {
            let err = f
                .service
                .reserve(f.member_id, f.concert_id, count)
                .await
                .unwrap_err();
            assert!(matches!(err, ReservationError::InvalidCount { .. }));
        }
        assert_eq!(available(&f).await, (10, 10));
    }

    #[tokio::test]
    async fn reserve_rejects_sold_out() {
        let f = fixture(2).await;
        f.service.reserve(f.member_id, f.concert_id, 2).await.unwrap();

        let err = f
            .service
            .reserve(f.member_id, f.concert_id, 1)
            .await
            .unwrap_err();
        assert_eq!(err.category(), RejectionCategory::Capacity);
        assert_eq!(available(&f).await, (0, 0));
    }

    #[tokio::test]
    async fn reserve_rejects_started_concert() {
        let f = fixture(2).await;
        f.clock.advance(Duration::days(8));

        let err = f
            .service
            .reserve(f.member_id, f.concert_id, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::ConcertNotAvailable { .. }));
        assert_eq!(available(&f).await, (2, 2));
    }

    #[tokio::test]
    async fn reserve_rejects_unknown_ids_and_inactive_members() {
        let f = fixture(2).await;

        let err = f
            .service
            .reserve(f.member_id, ConcertId::new(999), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::ConcertNotFound(_)));

        let err = f
            .service
            .reserve(MemberId::new(999), f.concert_id, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::MemberNotFound(_)));

        let suspended = f
            .service
            .store()
            .create_member(NewMember {
                name: "member002".into(),
                status: MemberStatus::Suspended,
            })
            .await
            .unwrap();
        let err = f
            .service
            .reserve(suspended.id, f.concert_id, 1)
            .await
            .unwrap_err();
        assert_eq!(err.category(), RejectionCategory::InvalidState);
    }

    #[tokio::test]
    async fn confirm_sells_tickets_once() {
        let f = fixture(3).await;
        let r = f.service.reserve(f.member_id, f.concert_id, 2).await.unwrap();

        let confirmed = f.service.confirm(r.id).await.unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);
        assert_eq!(confirmed.total_amount, r.total_amount);

        let err = f.service.confirm(r.id).await.unwrap_err();
        assert_eq!(err.category(), RejectionCategory::Conflict);

        let tickets = f.service.tickets_of(r.id).await.unwrap();
        assert!(tickets.iter().all(|t| t.status == TicketStatus::Sold));
        assert_eq!(available(&f).await, (1, 1));
    }

    #[tokio::test]
    async fn confirm_after_deadline_is_rejected() {
        let f = fixture(3).await;
        let r = f.service.reserve(f.member_id, f.concert_id, 1).await.unwrap();
        f.clock.advance(Duration::minutes(5));

        let err = f.service.confirm(r.id).await.unwrap_err();
        assert!(matches!(err, ReservationError::HoldExpired { .. }));

        let stored = f.service.get_reservation(r.id).await.unwrap();
        assert_eq!(stored.status, ReservationStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_confirmed_restores_seats() {
        let f = fixture(4).await;
        let r = f.service.reserve(f.member_id, f.concert_id, 2).await.unwrap();
        f.service.confirm(r.id).await.unwrap();
        assert_eq!(available(&f).await, (2, 2));

        let cancelled = f.service.cancel(r.id).await.unwrap();

        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(cancelled.tickets, r.tickets);
        assert_eq!(available(&f).await, (4, 4));
        let tickets = f.service.tickets_of(r.id).await.unwrap();
        assert!(tickets.iter().all(|t| t.status == TicketStatus::Available));

        let err = f.service.cancel(r.id).await.unwrap_err();
        assert!(matches!(err, ReservationError::InvalidTransition { .. }));
        assert_eq!(available(&f).await, (4, 4));
    }

    #[tokio::test]
    async fn expire_only_after_deadline() {
        let f = fixture(2).await;
        let r = f.service.reserve(f.member_id, f.concert_id, 1).await.unwrap();

        let err = f.service.expire(r.id).await.unwrap_err();
        assert!(matches!(err, ReservationError::InvalidTransition { .. }));

        f.clock.advance(Duration::minutes(6));
        let expired = f.service.expire(r.id).await.unwrap();
        assert_eq!(expired.status, ReservationStatus::Expired);
        assert_eq!(available(&f).await, (2, 2));

        let err = f.service.cancel(r.id).await.unwrap_err();
        assert_eq!(err.category(), RejectionCategory::Conflict);
    }

    #[tokio::test]
    async fn lookups() {
        let f = fixture(5).await;
        let first = f.service.reserve(f.member_id, f.concert_id, 1).await.unwrap();
        let second = f.service.reserve(f.member_id, f.concert_id, 1).await.unwrap();

        let found = f
            .service
            .find_by_number(&second.reservation_number)
            .await
            .unwrap();
        assert_eq!(found.id, second.id);

        let mine = f.service.list_for_member(f.member_id).await.unwrap();
        assert_eq!(
            mine.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );

        let err = f.service.find_by_number("RSV-NOPE").await.unwrap_err();
        assert_eq!(err.category(), RejectionCategory::NotFound);
        let err = f
            .service
            .get_reservation(ReservationId::new(404))
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::ReservationNotFound(_)));
    }

    #[tokio::test]
    async fn contention_is_bounded() {
        let f = fixture(1).await;
        let store = f
            .service
            .store()
            .clone()
            .with_lock_timeout(std::time::Duration::from_millis(5));
        let service = ReservationService::new(store.clone())
            .with_config(ReservationConfig::default().with_max_retries(2));

        let _held = store.begin(f.concert_id).await.unwrap();
        let err = service
            .reserve(f.member_id, f.concert_id, 1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReservationError::Contention { attempts: 3, .. }
        ));
        assert_eq!(err.category(), RejectionCategory::Contention);
    }
}
