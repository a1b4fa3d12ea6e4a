//! Reservation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ticket_store::{
    ConcertId, MemberId, Reservation, ReservationId, Ticket, TicketId, TicketStore,
};

use super::AppState;
use crate::error::ApiError;

// -- Request types --

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub concert_id: ConcertId,
    pub member_id: MemberId,
    #[serde(default = "one")]
    pub count: u32,
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub id: ReservationId,
    pub reservation_number: String,
    pub concert_id: ConcertId,
    pub member_id: MemberId,
    pub status: String,
    pub ticket_count: u32,
    pub ticket_ids: Vec<TicketId>,
    /// In minor currency units.
    pub total_amount: i64,
    pub created_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id,
            reservation_number: r.reservation_number,
            concert_id: r.concert_id,
            member_id: r.member_id,
            status: r.status.to_string(),
            ticket_count: r.ticket_count,
            ticket_ids: r.tickets,
            total_amount: r.total_amount.cents(),
            created_at: r.created_at,
            expired_at: r.expired_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    pub id: TicketId,
    pub seat_number: u32,
    pub price: i64,
    pub status: String,
}

impl From<Ticket> for TicketResponse {
    fn from(t: Ticket) -> Self {
        Self {
            id: t.id,
            seat_number: t.seat_number,
            price: t.price.cents(),
            status: t.status.to_string(),
        }
    }
}

// -- Handlers --

/// POST /api/reservations — reserve seats for a member.
#[tracing::instrument(skip(state))]
pub async fn create<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<ReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    let reservation = state
        .reservations
        .reserve(req.member_id, req.concert_id, req.count)
        .await?;
    Ok((StatusCode::CREATED, Json(reservation.into())))
}

/// GET /api/reservations/{id} — load a reservation.
#[tracing::instrument(skip(state))]
pub async fn get<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation = state
        .reservations
        .get_reservation(ReservationId::new(id))
        .await?;
    Ok(Json(reservation.into()))
}

/// GET /api/reservations/number/{number} — load a reservation by its external number.
#[tracing::instrument(skip(state))]
pub async fn by_number<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(number): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation = state.reservations.find_by_number(&number).await?;
    Ok(Json(reservation.into()))
}

/// GET /api/reservations/{id}/tickets — tickets held by a reservation.
#[tracing::instrument(skip(state))]
pub async fn tickets<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<TicketResponse>>, ApiError> {
    let tickets = state
        .reservations
        .tickets_of(ReservationId::new(id))
        .await?;
    Ok(Json(tickets.into_iter().map(Into::into).collect()))
}

/// POST /api/reservations/{id}/confirm — confirm a pending reservation.
#[tracing::instrument(skip(state))]
pub async fn confirm<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation = state.reservations.confirm(ReservationId::new(id)).await?;
    Ok(Json(reservation.into()))
}

/// POST /api/reservations/{id}/cancel — cancel a pending or confirmed reservation.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation = state.reservations.cancel(ReservationId::new(id)).await?;
    Ok(Json(reservation.into()))
}

/// GET /api/members/{id}/reservations — a member's reservations, oldest first.
#[tracing::instrument(skip(state))]
pub async fn for_member<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ReservationResponse>>, ApiError> {
    let reservations = state
        .reservations
        .list_for_member(MemberId::new(id))
        .await?;
    Ok(Json(reservations.into_iter().map(Into::into).collect()))
}
