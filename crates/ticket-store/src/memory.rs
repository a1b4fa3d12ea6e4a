use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Concert, ConcertId, InventorySnapshot, Member, MemberId, NewConcert, NewMember, Reservation,
    ReservationId, ReservationStatus, Result, SeatPool, StoreError, Ticket, TicketId,
    TicketLedger, TicketStatus,
    store::{TicketStore, UnitOfWork},
};

/// How long a caller waits for another writer of the same concert by default.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything owned by one concert. Guarded by that concert's lock.
#[derive(Debug)]
struct ConcertShard {
    concert: Concert,
    pool: SeatPool,
    ledger: TicketLedger,
    reservations: HashMap<ReservationId, Reservation>,
}

impl ConcertShard {
    fn concert(&self) -> Concert {
        let mut concert = self.concert.clone();
        concert.available_seats = self.pool.available();
        concert
    }
}

#[derive(Debug, Default)]
struct ReservationIndex {
    by_id: HashMap<ReservationId, ConcertId>,
    by_number: HashMap<String, ReservationId>,
    by_member: HashMap<MemberId, Vec<ReservationId>>,
}

#[derive(Debug, Default)]
struct Sequences {
    concert: AtomicI64,
    ticket: AtomicI64,
    member: AtomicI64,
    reservation: AtomicI64,
}

impl Sequences {
    fn next(counter: &AtomicI64) -> i64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// In-memory ticket store.
///
/// Each concert is serialized behind its own async mutex; waiting for it is
/// bounded by the lock timeout. Suitable for tests and single-process
/// deployments.
#[derive(Clone)]
pub struct InMemoryTicketStore {
    shards: Arc<RwLock<HashMap<ConcertId, Arc<Mutex<ConcertShard>>>>>,
    members: Arc<RwLock<HashMap<MemberId, Member>>>,
    index: Arc<RwLock<ReservationIndex>>,
    sequences: Arc<Sequences>,
    lock_timeout: Duration,
}

impl Default for InMemoryTicketStore {
    fn default() -> Self {
        Self {
            shards: Arc::default(),
            members: Arc::default(),
            index: Arc::default(),
            sequences: Arc::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl InMemoryTicketStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a caller waits for a concert held by another writer.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Returns the number of reservations ever committed.
    pub async fn reservation_count(&self) -> usize {
        self.index.read().await.by_id.len()
    }

    async fn shard(&self, id: ConcertId) -> Result<Arc<Mutex<ConcertShard>>> {
        self.shards
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::ConcertNotFound(id))
    }

    async fn lock(&self, id: ConcertId) -> Result<OwnedMutexGuard<ConcertShard>> {
        let shard = self.shard(id).await?;
        self.lock_shard(id, shard).await
    }

    async fn sorted_shards(&self) -> Vec<(ConcertId, Arc<Mutex<ConcertShard>>)> {
        let mut shards: Vec<_> = self
            .shards
            .read()
            .await
            .iter()
            .map(|(id, shard)| (*id, Arc::clone(shard)))
            .collect();
        shards.sort_by_key(|(id, _)| *id);
        shards
    }

    /// Every shard lock goes through here so timeouts are counted once.
    async fn lock_shard(
        &self,
        id: ConcertId,
        shard: Arc<Mutex<ConcertShard>>,
    ) -> Result<OwnedMutexGuard<ConcertShard>> {
        tokio::time::timeout(self.lock_timeout, shard.lock_owned())
            .await
            .map_err(|_| {
                metrics::counter!("ticket_store_lock_timeouts_total").increment(1);
                StoreError::Contention {
                    concert_id: Some(id),
                    detail: format!(
                        "concert {id} still busy after {}ms",
                        self.lock_timeout.as_millis()
                    ),
                }
            })
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    type Tx = MemoryUnitOfWork;

    fn backend(&self) -> &'static str {
        "memory"
    }

    #[tracing::instrument(skip(self))]
    async fn begin(&self, concert_id: ConcertId) -> Result<MemoryUnitOfWork> {
        let shard = self.lock(concert_id).await?;
        Ok(MemoryUnitOfWork {
            concert_id,
            shard,
            index: Arc::clone(&self.index),
            sequences: Arc::clone(&self.sequences),
            undo: Vec::new(),
            inserted: Vec::new(),
            committed: false,
        })
    }

    async fn create_concert(&self, new: NewConcert) -> Result<Concert> {
        let id = ConcertId::new(Sequences::next(&self.sequences.concert));
        let seats = i64::from(new.total_seats);
        let first_ticket = self.sequences.ticket.fetch_add(seats, Ordering::SeqCst) + 1;

        let tickets = (0..new.total_seats)
            .map(|offset| Ticket {
                id: TicketId::new(first_ticket + i64::from(offset)),
                concert_id: id,
                seat_number: offset + 1,
                price: new.ticket_price,
                status: TicketStatus::Available,
                reservation_id: None,
            })
            .collect();

        let concert = Concert {
            id,
            title: new.title,
            venue: new.venue,
            description: new.description,
            total_seats: new.total_seats,
            available_seats: new.total_seats,
            ticket_price: new.ticket_price,
            status: new.status,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            created_at: Utc::now(),
        };

        let shard = ConcertShard {
            concert: concert.clone(),
            pool: SeatPool::new(new.total_seats),
            ledger: TicketLedger::new(id, tickets),
            reservations: HashMap::new(),
        };
        self.shards
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(shard)));

        Ok(concert)
    }

    async fn get_concert(&self, id: ConcertId) -> Result<Option<Concert>> {
        match self.lock(id).await {
            Ok(shard) => Ok(Some(shard.concert())),
            Err(StoreError::ConcertNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_concerts(&self) -> Result<Vec<Concert>> {
        let mut concerts = Vec::new();
        for (id, shard) in self.sorted_shards().await {
            concerts.push(self.lock_shard(id, shard).await?.concert());
        }
        Ok(concerts)
    }

    async fn create_member(&self, new: NewMember) -> Result<Member> {
        let member = Member {
            id: MemberId::new(Sequences::next(&self.sequences.member)),
            name: new.name,
            status: new.status,
        };
        self.members.write().await.insert(member.id, member.clone());
        Ok(member)
    }

    async fn get_member(&self, id: MemberId) -> Result<Option<Member>> {
        Ok(self.members.read().await.get(&id).cloned())
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let concert_id = match self.index.read().await.by_id.get(&id) {
            Some(concert_id) => *concert_id,
            None => return Ok(None),
        };
        let shard = self.lock(concert_id).await?;
        Ok(shard.reservations.get(&id).cloned())
    }

    async fn find_reservation_by_number(&self, number: &str) -> Result<Option<Reservation>> {
        let id = self.index.read().await.by_number.get(number).copied();
        match id {
            Some(id) => self.get_reservation(id).await,
            None => Ok(None),
        }
    }

    async fn reservations_for_member(&self, member: MemberId) -> Result<Vec<Reservation>> {
        let ids = self
            .index
            .read()
            .await
            .by_member
            .get(&member)
            .cloned()
            .unwrap_or_default();

        let mut reservations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(reservation) = self.get_reservation(id).await? {
                reservations.push(reservation);
            }
        }
        reservations.sort_by_key(|r| (r.created_at, r.id));
        Ok(reservations)
    }

    async fn tickets_for_reservation(&self, id: ReservationId) -> Result<Vec<Ticket>> {
        let concert_id = match self.index.read().await.by_id.get(&id) {
            Some(concert_id) => *concert_id,
            None => return Err(StoreError::ReservationNotFound(id)),
        };
        let shard = self.lock(concert_id).await?;
        let reservation = shard
            .reservations
            .get(&id)
            .ok_or(StoreError::ReservationNotFound(id))?;
        Ok(shard.ledger.tickets(&reservation.tickets))
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ReservationId>> {
        let mut due = Vec::new();
        for (id, shard) in self.sorted_shards().await {
            // A busy concert is picked up by a later scan; the rest are not held back.
            let shard = match self.lock_shard(id, shard).await {
                Ok(shard) => shard,
                Err(StoreError::Contention { detail, .. }) => {
                    metrics::counter!("ticket_store_expiry_scan_skips_total").increment(1);
                    tracing::warn!(concert_id = %id, %detail, "skipping busy concert in expiry scan");
                    continue;
                }
                Err(e) => return Err(e),
            };
            due.extend(
                shard
                    .reservations
                    .values()
                    .filter(|r| r.status == ReservationStatus::Pending && r.is_expired(now))
                    .filter_map(|r| r.expired_at.map(|at| (at, r.id))),
            );
        }
        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn inventory_snapshot(&self, concert_id: ConcertId) -> Result<Option<InventorySnapshot>> {
        let shard = match self.lock(concert_id).await {
            Ok(shard) => shard,
            Err(StoreError::ConcertNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(InventorySnapshot {
            concert_id,
            title: shard.concert.title.clone(),
            total_seats: shard.pool.total(),
            available_seats: shard.pool.available(),
            available_tickets: shard.ledger.available_count(),
        }))
    }

    async fn reset(&self) -> Result<()> {
        self.shards.write().await.clear();
        self.members.write().await.clear();
        *self.index.write().await = ReservationIndex::default();
        Ok(())
    }
}

enum Undo {
    Pool(SeatPool),
    Tickets(Vec<Ticket>),
    Reservation {
        id: ReservationId,
        previous: Option<Reservation>,
    },
}

/// Unit of work holding one concert's lock.
///
/// Changes are applied in place and recorded in an undo log; dropping the
/// unit without a successful commit replays the log backwards.
pub struct MemoryUnitOfWork {
    concert_id: ConcertId,
    shard: OwnedMutexGuard<ConcertShard>,
    index: Arc<RwLock<ReservationIndex>>,
    sequences: Arc<Sequences>,
    undo: Vec<Undo>,
    inserted: Vec<(ReservationId, String, MemberId)>,
    committed: bool,
}

impl MemoryUnitOfWork {
    fn rollback(&mut self) {
        if self.undo.is_empty() {
            return;
        }
        tracing::debug!(concert_id = %self.concert_id, steps = self.undo.len(), "rolling back unit of work");
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Pool(pool) => self.shard.pool = pool,
                Undo::Tickets(saved) => self.shard.ledger.restore(saved),
                Undo::Reservation {
                    id,
                    previous: Some(reservation),
                } => {
                    self.shard.reservations.insert(id, reservation);
                }
                Undo::Reservation { id, previous: None } => {
                    self.shard.reservations.remove(&id);
                }
            }
        }
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn concert_id(&self) -> ConcertId {
        self.concert_id
    }

    async fn concert(&mut self) -> Result<Concert> {
        Ok(self.shard.concert())
    }

    async fn try_reserve_seats(&mut self, count: u32) -> Result<bool> {
        let before = self.shard.pool;
        if !self.shard.pool.try_reserve(count) {
            return Ok(false);
        }
        self.undo.push(Undo::Pool(before));
        Ok(true)
    }

    async fn release_seats(&mut self, count: u32) -> Result<u32> {
        let before = self.shard.pool;
        let restored = self.shard.pool.release(count);
        if restored > 0 {
            self.undo.push(Undo::Pool(before));
        }
        Ok(restored)
    }

    async fn claim_seats(
        &mut self,
        count: u32,
        reservation: ReservationId,
    ) -> Result<Vec<TicketId>> {
        let claimed = self.shard.ledger.claim_seats(count, reservation)?;
        let saved = self
            .shard
            .ledger
            .tickets(&claimed)
            .into_iter()
            .map(|mut ticket| {
                ticket.status = TicketStatus::Available;
                ticket.reservation_id = None;
                ticket
            })
            .collect();
        self.undo.push(Undo::Tickets(saved));
        Ok(claimed)
    }

    async fn release_tickets(
        &mut self,
        reservation: ReservationId,
        tickets: &[TicketId],
    ) -> Result<()> {
        let saved = self.shard.ledger.tickets(tickets);
        self.shard.ledger.release(reservation, tickets)?;
        self.undo.push(Undo::Tickets(saved));
        Ok(())
    }

    async fn mark_sold(&mut self, reservation: ReservationId, tickets: &[TicketId]) -> Result<()> {
        let saved = self.shard.ledger.tickets(tickets);
        self.shard.ledger.mark_sold(reservation, tickets)?;
        self.undo.push(Undo::Tickets(saved));
        Ok(())
    }

    async fn next_reservation_id(&mut self) -> Result<ReservationId> {
        Ok(ReservationId::new(Sequences::next(
            &self.sequences.reservation,
        )))
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        if reservation.concert_id != self.concert_id {
            return Err(StoreError::Invariant(format!(
                "reservation {} targets concert {} inside a unit of work on concert {}",
                reservation.id, reservation.concert_id, self.concert_id
            )));
        }
        if self.shard.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Invariant(format!(
                "reservation {} already exists",
                reservation.id
            )));
        }
        let number_taken = self
            .index
            .read()
            .await
            .by_number
            .contains_key(&reservation.reservation_number)
            || self
                .inserted
                .iter()
                .any(|(_, number, _)| number == &reservation.reservation_number);
        if number_taken {
            return Err(StoreError::DuplicateReservationNumber(
                reservation.reservation_number.clone(),
            ));
        }

        self.undo.push(Undo::Reservation {
            id: reservation.id,
            previous: None,
        });
        self.shard
            .reservations
            .insert(reservation.id, reservation.clone());
        self.inserted.push((
            reservation.id,
            reservation.reservation_number.clone(),
            reservation.member_id,
        ));
        Ok(())
    }

    async fn reservation_for_update(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.shard.reservations.get(&id).cloned())
    }

    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(reservation) = self.shard.reservations.get_mut(&id) else {
            return Err(StoreError::ReservationNotFound(id));
        };
        if reservation.status != from {
            return Ok(false);
        }
        let previous = reservation.clone();
        reservation.status = to;
        reservation.updated_at = at;
        self.undo.push(Undo::Reservation {
            id,
            previous: Some(previous),
        });
        Ok(true)
    }

    async fn commit(mut self) -> Result<()> {
        if !self.inserted.is_empty() {
            let index = Arc::clone(&self.index);
            let mut index = index.write().await;
            if let Some((_, number, _)) = self
                .inserted
                .iter()
                .find(|(_, number, _)| index.by_number.contains_key(number))
            {
                // Dropping `self` rolls the unit back.
                return Err(StoreError::DuplicateReservationNumber(number.clone()));
            }
            for (id, number, member) in self.inserted.drain(..) {
                index.by_id.insert(id, self.concert_id);
                index.by_number.insert(number, id);
                index.by_member.entry(member).or_default().push(id);
            }
        }
        self.committed = true;
        self.undo.clear();
        Ok(())
    }
}
