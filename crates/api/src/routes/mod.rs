//! HTTP route handlers.

pub mod bootstrap;
pub mod concerts;
pub mod health;
pub mod metrics;
pub mod reservations;

use std::sync::Arc;

use domain::{InventoryAudit, ReservationService};
use ticket_store::TicketStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S: TicketStore> {
    pub reservations: Arc<ReservationService<S>>,
    pub audit: InventoryAudit<S>,
    pub store: S,
}
