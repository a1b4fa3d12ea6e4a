use thiserror::Error;

use crate::{ConcertId, ReservationId};

/// Errors that can occur when interacting with the ticket store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The concert does not exist.
    #[error("Concert not found: {0}")]
    ConcertNotFound(ConcertId),

    /// The reservation does not exist (or belongs to another concert).
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// Fewer AVAILABLE tickets exist than were requested. Nothing was claimed.
    #[error("Insufficient tickets: requested {requested}, available {available}")]
    InsufficientTickets { requested: u32, available: u32 },

    /// Another writer holds the concert; the bounded wait ran out.
    #[error("Contention: {detail}")]
    Contention {
        concert_id: Option<ConcertId>,
        detail: String,
    },

    /// The connection pool (or equivalent resource) is exhausted.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Pool, ledger and reservation state disagree.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// A generated reservation number already exists.
    #[error("Duplicate reservation number: {0}")]
    DuplicateReservationNumber(String),

    /// A stored value could not be decoded into the model.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true for transient failures worth retrying after a short pause.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Contention { .. } | StoreError::Unavailable(_)
        )
    }
}

/// Postgres SQLSTATE codes that signal lock or serialization contention.
const LOCK_NOT_AVAILABLE: &str = "55P03";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                StoreError::Unavailable("connection pool timed out".to_string())
            }
            sqlx::Error::PoolClosed => StoreError::Unavailable("connection pool closed".to_string()),
            sqlx::Error::Database(ref db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                match code.as_deref() {
                    Some(LOCK_NOT_AVAILABLE | SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => {
                        StoreError::Contention {
                            concert_id: None,
                            detail: db_err.message().to_string(),
                        }
                    }
                    Some(UNIQUE_VIOLATION)
                        if db_err.constraint() == Some("unique_reservation_number") =>
                    {
                        StoreError::DuplicateReservationNumber(db_err.message().to_string())
                    }
                    _ => StoreError::Database(err),
                }
            }
            other => StoreError::Database(other),
        }
    }
}

/// Result type for ticket store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
