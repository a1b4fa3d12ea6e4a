use serde::{Deserialize, Serialize};

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw database identifier.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw identifier.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

integer_id!(
    /// Identity of a concert, which owns one seat pool and one ticket ledger.
    ConcertId
);
integer_id!(
    /// Identity of a member who places reservations.
    MemberId
);
integer_id!(
    /// Identity of a single seat record in the ticket ledger.
    TicketId
);
integer_id!(
    /// Internal identity of a reservation.
    ReservationId
);

/// Money amount represented in cents to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Returns the amount in cents.
    pub const fn cents(&self) -> i64 {
        self.cents
    }

    /// Multiplies a unit price by a ticket count.
    ///
    /// Returns `None` on overflow.
    pub fn checked_times(&self, count: u32) -> Option<Self> {
        self.cents
            .checked_mul(i64::from(count))
            .map(|cents| Self { cents })
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
