//! Concert and inventory endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use domain::InventoryReport;
use serde::Serialize;
use ticket_store::{Concert, ConcertId, TicketStore};

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcertResponse {
    pub id: ConcertId,
    pub title: String,
    pub venue: String,
    pub status: String,
    pub total_seats: u32,
    pub available_seats: u32,
    pub ticket_price: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl From<Concert> for ConcertResponse {
    fn from(c: Concert) -> Self {
        Self {
            id: c.id,
            title: c.title,
            venue: c.venue,
            status: c.status.to_string(),
            total_seats: c.total_seats,
            available_seats: c.available_seats,
            ticket_price: c.ticket_price.cents(),
            starts_at: c.starts_at,
            ends_at: c.ends_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReportResponse {
    pub concerts: Vec<InventoryReport>,
    pub mismatched: usize,
}

/// GET /api/concerts — all concerts.
#[tracing::instrument(skip(state))]
pub async fn list<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ConcertResponse>>, ApiError> {
    let concerts = state.store.list_concerts().await?;
    Ok(Json(concerts.into_iter().map(Into::into).collect()))
}

/// GET /api/concerts/{id} — concert state including remaining seats.
#[tracing::instrument(skip(state))]
pub async fn get<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<ConcertResponse>, ApiError> {
    let concert = state.reservations.concert(ConcertId::new(id)).await?;
    Ok(Json(concert.into()))
}

/// GET /api/concerts/{id}/inventory — pool counter vs. ledger for one concert.
#[tracing::instrument(skip(state))]
pub async fn inventory<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<InventoryReport>, ApiError> {
    let report = state.audit.audit_concert(ConcertId::new(id)).await?;
    Ok(Json(report))
}

/// GET /api/inventory/report — audit of every concert.
#[tracing::instrument(skip(state))]
pub async fn report<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<InventoryReportResponse>, ApiError> {
    let concerts = state.audit.audit_all().await?;
    let mismatched = concerts.iter().filter(|r| !r.consistent).count();
    Ok(Json(InventoryReportResponse {
        concerts,
        mismatched,
    }))
}
