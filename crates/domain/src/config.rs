//! Reservation lifecycle configuration.

use chrono::Duration;

use crate::RetryPolicy;

/// Default hold window for PENDING reservations.
pub const DEFAULT_HOLD_WINDOW_SECS: i64 = 5 * 60;

/// Default upper bound on tickets per reservation.
pub const DEFAULT_MAX_TICKETS: u32 = 4;

/// Tunables of the reservation lifecycle.
#[derive(Debug, Clone)]
pub struct ReservationConfig {
    /// How long a PENDING reservation holds its seats.
    pub hold_window: Duration,
    /// Largest `count` a single reservation may ask for.
    pub max_tickets_per_reservation: u32,
    /// Retry budget for contended units of work.
    pub retry: RetryPolicy,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            hold_window: Duration::seconds(DEFAULT_HOLD_WINDOW_SECS),
            max_tickets_per_reservation: DEFAULT_MAX_TICKETS,
            retry: RetryPolicy::default(),
        }
    }
}

impl ReservationConfig {
    /// Sets the hold window.
    pub fn with_hold_window(mut self, hold_window: Duration) -> Self {
        self.hold_window = hold_window;
        self
    }

    /// Sets the maximum number of retries on contention.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }
}
