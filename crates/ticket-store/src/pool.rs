//! The seat pool: a concert's counter of remaining sellable seats.
//!
//! A decrement succeeds only if enough seats remain at the moment of the
//! check, and the check and the decrement happen as one step. In memory that
//! step runs under the concert's lock; in PostgreSQL it is the single
//! conditional `UPDATE` in [`sql::TRY_RESERVE`], decided by its affected-row
//! count.

/// In-memory seat counter for one concert.
///
/// Invariant: `available <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatPool {
    total: u32,
    available: u32,
}

impl SeatPool {
    /// A fresh pool with every seat available.
    pub fn new(total: u32) -> Self {
        Self {
            total,
            available: total,
        }
    }

    /// Total seats of the concert.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Seats that can still be taken.
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Takes `count` seats if at least that many remain.
    ///
    /// Returns `false` (leaving the pool untouched) when the concert cannot
    /// cover the request. That is the normal sold-out outcome, not a fault.
    pub fn try_reserve(&mut self, count: u32) -> bool {
        if count == 0 || self.available < count {
            return false;
        }
        self.available -= count;
        true
    }

    /// Gives `count` seats back, never exceeding the total.
    ///
    /// Returns how many seats were actually restored; anything less than
    /// `count` means the caller released seats that were never taken.
    pub fn release(&mut self, count: u32) -> u32 {
        let restored = count.min(self.total - self.available);
        self.available += restored;
        restored
    }
}

pub(crate) mod sql {
    /// Conditional decrement. One affected row means the seats were taken.
    pub const TRY_RESERVE: &str = r#"
        UPDATE concerts
        SET available_seats = available_seats - $2, updated_at = NOW()
        WHERE id = $1 AND available_seats >= $2
    "#;

    /// Capped increment, returning how many seats were restored.
    pub const RELEASE: &str = r#"
        WITH before AS (
            SELECT available_seats FROM concerts WHERE id = $1 FOR UPDATE
        )
        UPDATE concerts c
        SET available_seats = LEAST(c.available_seats + $2, c.total_seats), updated_at = NOW()
        FROM before
        WHERE c.id = $1
        RETURNING c.available_seats - before.available_seats AS restored
    "#;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_decrements_until_exhausted() {
        let mut pool = SeatPool::new(5);

        assert!(pool.try_reserve(3));
        assert_eq!(pool.available(), 2);
        assert!(pool.try_reserve(2));
        assert_eq!(pool.available(), 0);
        assert!(!pool.try_reserve(1));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn reserve_rejects_request_larger_than_remaining() {
        let mut pool = SeatPool::new(3);
        assert!(pool.try_reserve(2));

        assert!(!pool.try_reserve(2));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn reserve_zero_is_rejected() {
        let mut pool = SeatPool::new(3);
        assert!(!pool.try_reserve(0));
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn release_is_capped_at_total() {
        let mut pool = SeatPool::new(4);
        assert!(pool.try_reserve(2));

        assert_eq!(pool.release(2), 2);
        assert_eq!(pool.available(), 4);

        // Double release restores nothing.
        assert_eq!(pool.release(2), 0);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn partial_release_over_cap() {
        let mut pool = SeatPool::new(4);
        assert!(pool.try_reserve(1));
        assert_eq!(pool.release(3), 1);
        assert_eq!(pool.total(), 4);
        assert_eq!(pool.available(), 4);
    }
}
