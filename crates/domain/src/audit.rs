//! Inventory audit.
//!
//! Compares each concert's seat pool counter with the number of AVAILABLE
//! tickets in its ledger. The two must always agree; a mismatch is reported
//! and logged, never repaired silently.

use serde::Serialize;
use ticket_store::{ConcertId, InventorySnapshot, TicketStore};

use crate::ReservationError;

/// Audit result for one concert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReport {
    pub concert_id: ConcertId,
    pub title: String,
    pub total_seats: u32,
    pub available_seats: u32,
    pub available_tickets: u32,
    pub consistent: bool,
}

impl From<InventorySnapshot> for InventoryReport {
    fn from(snapshot: InventorySnapshot) -> Self {
        Self {
            consistent: snapshot.is_consistent(),
            concert_id: snapshot.concert_id,
            title: snapshot.title,
            total_seats: snapshot.total_seats,
            available_seats: snapshot.available_seats,
            available_tickets: snapshot.available_tickets,
        }
    }
}

/// Reads inventory snapshots and reports pool/ledger disagreement.
#[derive(Clone)]
pub struct InventoryAudit<S> {
    store: S,
}

impl<S: TicketStore> InventoryAudit<S> {
    /// Creates an audit over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Audits one concert.
    #[tracing::instrument(skip(self))]
    pub async fn audit_concert(
        &self,
        concert_id: ConcertId,
    ) -> Result<InventoryReport, ReservationError> {
        let snapshot = self
            .store
            .inventory_snapshot(concert_id)
            .await?
            .ok_or(ReservationError::ConcertNotFound(concert_id))?;
        Ok(Self::report(snapshot))
    }

    /// Audits every concert, ordered by id.
    #[tracing::instrument(skip(self))]
    pub async fn audit_all(&self) -> Result<Vec<InventoryReport>, ReservationError> {
        let mut reports = Vec::new();
        for concert in self.store.list_concerts().await? {
            if let Some(snapshot) = self.store.inventory_snapshot(concert.id).await? {
                reports.push(Self::report(snapshot));
            }
        }

        let mismatched = reports.iter().filter(|r| !r.consistent).count();
        tracing::info!(concerts = reports.len(), mismatched, "inventory audit finished");
        Ok(reports)
    }

    fn report(snapshot: InventorySnapshot) -> InventoryReport {
        let report = InventoryReport::from(snapshot);
        if !report.consistent {
            metrics::counter!("inventory_mismatches_total").increment(1);
            tracing::warn!(
                concert_id = %report.concert_id,
                total_seats = report.total_seats,
                available_seats = report.available_seats,
                available_tickets = report.available_tickets,
                "seat pool and ticket ledger disagree"
            );
        }
        report
    }
}
