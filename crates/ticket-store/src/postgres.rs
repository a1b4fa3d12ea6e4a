use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    Concert, ConcertId, InventorySnapshot, Member, MemberId, Money, NewConcert, NewMember,
    Reservation, ReservationId, ReservationStatus, Result, StoreError, Ticket, TicketId,
    pool::sql,
    store::{TicketStore, UnitOfWork},
};

/// Default bound on how long a statement waits for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2_000);

const CONCERT_COLUMNS: &str = r#"
    id, title, venue, description, total_seats, available_seats, ticket_price,
    status, starts_at, ends_at, created_at
"#;

const TICKET_COLUMNS: &str = "t.id, t.concert_id, t.seat_number, t.price, t.status, t.reservation_id";

const RESERVATION_SELECT: &str = r#"
    SELECT r.id, r.reservation_number, r.member_id, r.concert_id, r.ticket_count,
           r.total_amount, r.status, r.created_at, r.updated_at, r.expired_at,
           ARRAY(
               SELECT rt.ticket_id FROM reservation_tickets rt
               WHERE rt.reservation_id = r.id
               ORDER BY rt.position
           ) AS ticket_ids
    FROM reservations r
"#;

/// PostgreSQL-backed ticket store.
///
/// A unit of work is one database transaction that starts by locking the
/// concert row, so writers of the same concert queue up there. The wait is
/// bounded by `lock_timeout`.
#[derive(Clone)]
pub struct PostgresTicketStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresTicketStore {
    /// Creates a new PostgreSQL ticket store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets the per-transaction `lock_timeout`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    async fn fetch_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let query = format!("{RESERVATION_SELECT} WHERE r.id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_reservation).transpose()
    }
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Decode(format!("{column} out of range: {value}")))
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::Invariant(format!("count {value} too large")))
}

fn ids(tickets: &[TicketId]) -> Vec<i64> {
    tickets.iter().map(|t| t.as_i64()).collect()
}

fn row_to_concert(row: PgRow) -> Result<Concert> {
    Ok(Concert {
        id: ConcertId::new(row.try_get("id")?),
        title: row.try_get("title")?,
        venue: row.try_get("venue")?,
        description: row.try_get("description")?,
        total_seats: to_u32(row.try_get("total_seats")?, "total_seats")?,
        available_seats: to_u32(row.try_get("available_seats")?, "available_seats")?,
        ticket_price: Money::from_cents(row.try_get("ticket_price")?),
        status: row.try_get::<String, _>("status")?.parse()?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_ticket(row: PgRow) -> Result<Ticket> {
    Ok(Ticket {
        id: TicketId::new(row.try_get("id")?),
        concert_id: ConcertId::new(row.try_get("concert_id")?),
        seat_number: to_u32(row.try_get("seat_number")?, "seat_number")?,
        price: Money::from_cents(row.try_get("price")?),
        status: row.try_get::<String, _>("status")?.parse()?,
        reservation_id: row
            .try_get::<Option<i64>, _>("reservation_id")?
            .map(ReservationId::new),
    })
}

fn row_to_member(row: PgRow) -> Result<Member> {
    Ok(Member {
        id: MemberId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        status: row.try_get::<String, _>("status")?.parse()?,
    })
}

fn row_to_reservation(row: PgRow) -> Result<Reservation> {
    let ticket_ids: Vec<i64> = row.try_get("ticket_ids")?;
    Ok(Reservation {
        id: ReservationId::new(row.try_get("id")?),
        reservation_number: row.try_get("reservation_number")?,
        member_id: MemberId::new(row.try_get("member_id")?),
        concert_id: ConcertId::new(row.try_get("concert_id")?),
        tickets: ticket_ids.into_iter().map(TicketId::new).collect(),
        ticket_count: to_u32(row.try_get("ticket_count")?, "ticket_count")?,
        total_amount: Money::from_cents(row.try_get("total_amount")?),
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        expired_at: row.try_get("expired_at")?,
    })
}

#[async_trait]
impl TicketStore for PostgresTicketStore {
    type Tx = PgUnitOfWork;

    fn backend(&self) -> &'static str {
        "postgres"
    }

    #[tracing::instrument(skip(self))]
    async fn begin(&self, concert_id: ConcertId) -> Result<PgUnitOfWork> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters.
        let set_timeout = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&set_timeout).execute(&mut *tx).await?;

        let locked = sqlx::query("SELECT id FROM concerts WHERE id = $1 FOR NO KEY UPDATE")
            .bind(concert_id.as_i64())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::Contention { detail, .. } => StoreError::Contention {
                    concert_id: Some(concert_id),
                    detail,
                },
                other => other,
            })?;
        if locked.is_none() {
            return Err(StoreError::ConcertNotFound(concert_id));
        }

        Ok(PgUnitOfWork { concert_id, tx })
    }

    async fn create_concert(&self, new: NewConcert) -> Result<Concert> {
        let mut tx = self.pool.begin().await?;
        let seats = to_i32(new.total_seats)?;

        let query = format!(
            r#"
            INSERT INTO concerts (title, venue, description, total_seats, available_seats,
                                  ticket_price, status, starts_at, ends_at)
            VALUES ($1, $2, $3, $4, $4, $5, $6, $7, $8)
            RETURNING {CONCERT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(&new.title)
            .bind(&new.venue)
            .bind(&new.description)
            .bind(seats)
            .bind(new.ticket_price.cents())
            .bind(new.status.as_str())
            .bind(new.starts_at)
            .bind(new.ends_at)
            .fetch_one(&mut *tx)
            .await?;
        let concert = row_to_concert(row)?;

        sqlx::query(
            r#"
            INSERT INTO tickets (concert_id, seat_number, price, status)
            SELECT $1, seat, $2, 'AVAILABLE' FROM generate_series(1, $3) AS seat
            "#,
        )
        .bind(concert.id.as_i64())
        .bind(new.ticket_price.cents())
        .bind(seats)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(concert_id = %concert.id, seats = concert.total_seats, "concert created");
        Ok(concert)
    }

    async fn get_concert(&self, id: ConcertId) -> Result<Option<Concert>> {
        let query = format!("SELECT {CONCERT_COLUMNS} FROM concerts WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_concert).transpose()
    }

    async fn list_concerts(&self) -> Result<Vec<Concert>> {
        let query = format!("SELECT {CONCERT_COLUMNS} FROM concerts ORDER BY id");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_concert).collect()
    }

    async fn create_member(&self, new: NewMember) -> Result<Member> {
        let row = sqlx::query(
            "INSERT INTO members (name, status) VALUES ($1, $2) RETURNING id, name, status",
        )
        .bind(&new.name)
        .bind(new.status.as_str())
        .fetch_one(&self.pool)
        .await?;
        row_to_member(row)
    }

    async fn get_member(&self, id: MemberId) -> Result<Option<Member>> {
        let row = sqlx::query("SELECT id, name, status FROM members WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_member).transpose()
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        self.fetch_reservation(id).await
    }

    async fn find_reservation_by_number(&self, number: &str) -> Result<Option<Reservation>> {
        let query = format!("{RESERVATION_SELECT} WHERE r.reservation_number = $1");
        let row = sqlx::query(&query)
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_reservation).transpose()
    }

    async fn reservations_for_member(&self, member: MemberId) -> Result<Vec<Reservation>> {
        let query = format!("{RESERVATION_SELECT} WHERE r.member_id = $1 ORDER BY r.created_at, r.id");
        let rows = sqlx::query(&query)
            .bind(member.as_i64())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_reservation).collect()
    }

    async fn tickets_for_reservation(&self, id: ReservationId) -> Result<Vec<Ticket>> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM reservations WHERE id = $1)")
                .bind(id.as_i64())
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(StoreError::ReservationNotFound(id));
        }

        let query = format!(
            r#"
            SELECT {TICKET_COLUMNS}
            FROM tickets t
            JOIN reservation_tickets rt ON rt.ticket_id = t.id
            WHERE rt.reservation_id = $1
            ORDER BY t.seat_number
            "#
        );
        let rows = sqlx::query(&query)
            .bind(id.as_i64())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_ticket).collect()
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ReservationId>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM reservations
            WHERE status = 'PENDING' AND expired_at <= $1
            ORDER BY expired_at, id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ReservationId::new).collect())
    }

    async fn inventory_snapshot(&self, concert_id: ConcertId) -> Result<Option<InventorySnapshot>> {
        // One statement, so both numbers come from the same snapshot.
        let row = sqlx::query(
            r#"
            SELECT c.id, c.title, c.total_seats, c.available_seats,
                   (SELECT COUNT(*) FROM tickets t
                    WHERE t.concert_id = c.id AND t.status = 'AVAILABLE') AS available_tickets
            FROM concerts c
            WHERE c.id = $1
            "#,
        )
        .bind(concert_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let available_tickets: i64 = row.try_get("available_tickets")?;
        Ok(Some(InventorySnapshot {
            concert_id,
            title: row.try_get("title")?,
            total_seats: to_u32(row.try_get("total_seats")?, "total_seats")?,
            available_seats: to_u32(row.try_get("available_seats")?, "available_seats")?,
            available_tickets: u32::try_from(available_tickets).map_err(|_| {
                StoreError::Decode(format!("available ticket count out of range: {available_tickets}"))
            })?,
        }))
    }

    async fn reset(&self) -> Result<()> {
        sqlx::query(
            "TRUNCATE reservation_tickets, tickets, reservations, members, concerts RESTART IDENTITY CASCADE",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Unit of work backed by a PostgreSQL transaction holding the concert row lock.
///
/// Dropping it without [`commit`](UnitOfWork::commit) rolls the transaction back.
pub struct PgUnitOfWork {
    concert_id: ConcertId,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    fn concert_id(&self) -> ConcertId {
        self.concert_id
    }

    async fn concert(&mut self) -> Result<Concert> {
        let query = format!("SELECT {CONCERT_COLUMNS} FROM concerts WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(self.concert_id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::ConcertNotFound(self.concert_id))?;
        row_to_concert(row)
    }

    async fn try_reserve_seats(&mut self, count: u32) -> Result<bool> {
        if count == 0 {
            return Ok(false);
        }
        let result = sqlx::query(sql::TRY_RESERVE)
            .bind(self.concert_id.as_i64())
            .bind(to_i32(count)?)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_seats(&mut self, count: u32) -> Result<u32> {
        let restored: Option<i32> = sqlx::query_scalar(sql::RELEASE)
            .bind(self.concert_id.as_i64())
            .bind(to_i32(count)?)
            .fetch_optional(&mut *self.tx)
            .await?;
        match restored {
            Some(restored) => to_u32(restored, "restored"),
            None => Err(StoreError::ConcertNotFound(self.concert_id)),
        }
    }

    async fn claim_seats(
        &mut self,
        count: u32,
        reservation: ReservationId,
    ) -> Result<Vec<TicketId>> {
        let rows = sqlx::query(
            r#"
            UPDATE tickets SET status = 'RESERVED', reservation_id = $3
            WHERE id IN (
                SELECT id FROM tickets
                WHERE concert_id = $1 AND status = 'AVAILABLE'
                ORDER BY seat_number
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, seat_number
            "#,
        )
        .bind(self.concert_id.as_i64())
        .bind(i64::from(count))
        .bind(reservation.as_i64())
        .fetch_all(&mut *self.tx)
        .await?;

        let claimed = u32::try_from(rows.len()).unwrap_or(u32::MAX);
        if claimed < count {
            // The partial update dies with the transaction.
            return Err(StoreError::InsufficientTickets {
                requested: count,
                available: claimed,
            });
        }

        let mut seats = rows
            .into_iter()
            .map(|row| Ok((row.try_get::<i32, _>("seat_number")?, row.try_get::<i64, _>("id")?)))
            .collect::<Result<Vec<_>>>()?;
        seats.sort_unstable();
        Ok(seats.into_iter().map(|(_, id)| TicketId::new(id)).collect())
    }

    async fn release_tickets(
        &mut self,
        reservation: ReservationId,
        tickets: &[TicketId],
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tickets SET status = 'AVAILABLE', reservation_id = NULL
            WHERE id = ANY($1) AND reservation_id = $2 AND status IN ('RESERVED', 'SOLD')
            "#,
        )
        .bind(ids(tickets))
        .bind(reservation.as_i64())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != tickets.len() as u64 {
            return Err(StoreError::Invariant(format!(
                "reservation {reservation} holds {} of its {} tickets",
                result.rows_affected(),
                tickets.len()
            )));
        }
        Ok(())
    }

    async fn mark_sold(&mut self, reservation: ReservationId, tickets: &[TicketId]) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tickets SET status = 'SOLD'
            WHERE id = ANY($1) AND reservation_id = $2 AND status = 'RESERVED'
            "#,
        )
        .bind(ids(tickets))
        .bind(reservation.as_i64())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != tickets.len() as u64 {
            return Err(StoreError::Invariant(format!(
                "reservation {reservation} has {} of its {} tickets reserved",
                result.rows_affected(),
                tickets.len()
            )));
        }
        Ok(())
    }

    async fn next_reservation_id(&mut self) -> Result<ReservationId> {
        let id: i64 = sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('reservations', 'id'))")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(ReservationId::new(id))
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        if reservation.concert_id != self.concert_id {
            return Err(StoreError::Invariant(format!(
                "reservation {} targets concert {} inside a unit of work on concert {}",
                reservation.id, reservation.concert_id, self.concert_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO reservations (id, reservation_number, member_id, concert_id, ticket_count,
                                      total_amount, status, created_at, updated_at, expired_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(reservation.id.as_i64())
        .bind(&reservation.reservation_number)
        .bind(reservation.member_id.as_i64())
        .bind(reservation.concert_id.as_i64())
        .bind(to_i32(reservation.ticket_count)?)
        .bind(reservation.total_amount.cents())
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .bind(reservation.expired_at)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO reservation_tickets (reservation_id, ticket_id, position)
            SELECT $1, t.ticket_id, t.position
            FROM UNNEST($2::BIGINT[]) WITH ORDINALITY AS t(ticket_id, position)
            "#,
        )
        .bind(reservation.id.as_i64())
        .bind(ids(&reservation.tickets))
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn reservation_for_update(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        let query = format!("{RESERVATION_SELECT} WHERE r.id = $1 AND r.concert_id = $2 FOR UPDATE OF r");
        let row = sqlx::query(&query)
            .bind(id.as_i64())
            .bind(self.concert_id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(row_to_reservation).transpose()
    }

    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(id.as_i64())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
