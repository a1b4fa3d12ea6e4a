//! External reservation numbers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generates a reservation number such as `RSV-20260314-9F2C41D07B3A`.
///
/// The date is the creation day; the suffix is random. Uniqueness is enforced
/// by the store, and a collision makes the reservation attempt retry.
pub fn generate(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("RSV-{}-{}", now.format("%Y%m%d"), &suffix[..12])
}
