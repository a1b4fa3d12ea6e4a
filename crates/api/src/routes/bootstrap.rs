//! Test-data bootstrap for load-test clients.
//!
//! Wipes the store and seeds a fixed set of concerts and members so that
//! clients can target valid ids. Reservations made against seeded data go
//! through exactly the same validation as any other.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use ticket_store::{
    ConcertId, ConcertStatus, MemberId, Money, NewConcert, NewMember, TicketStore,
};

use super::AppState;
use crate::error::ApiError;

const CONCERT_TITLES: [&str; 5] = [
    "2024 Spring Concert",
    "2024 Summer Festival",
    "2024 Autumn Musical",
    "2024 Winter Orchestra",
    "2024 Year-End Gala",
];
const MEMBER_COUNT: usize = 200;
const DEFAULT_SEATS: u32 = 100;
const MAX_SEATS: u32 = 100_000;
const TICKET_PRICE_CENTS: i64 = 100_000;

#[derive(Debug, Deserialize)]
pub struct InitParams {
    pub seats: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub concert_count: usize,
    pub member_count: usize,
    pub concert_ids: Vec<ConcertId>,
    pub member_ids: Vec<MemberId>,
    pub message: String,
}

/// POST /api/test/init — reset the store and seed concerts and members.
#[tracing::instrument(skip(state))]
pub async fn init<S: TicketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<InitParams>,
) -> Result<(StatusCode, Json<InitResponse>), ApiError> {
    let seats = params.seats.unwrap_or(DEFAULT_SEATS);
    if seats == 0 || seats > MAX_SEATS {
        return Err(ApiError::BadRequest(format!(
            "seats must be between 1 and {MAX_SEATS}, got {seats}"
        )));
    }

    state.store.reset().await?;

    let starts_at = Utc::now() + Duration::days(30);
    let mut concert_ids = Vec::with_capacity(CONCERT_TITLES.len());
    for title in CONCERT_TITLES {
        let concert = state
            .store
            .create_concert(NewConcert {
                title: title.to_string(),
                venue: "Main Hall".to_string(),
                description: String::new(),
                total_seats: seats,
                ticket_price: Money::from_cents(TICKET_PRICE_CENTS),
                status: ConcertStatus::Upcoming,
                starts_at,
                ends_at: starts_at + Duration::hours(3),
            })
            .await?;
        concert_ids.push(concert.id);
    }

    let mut member_ids = Vec::with_capacity(MEMBER_COUNT);
    for n in 1..=MEMBER_COUNT {
        let member = state
            .store
            .create_member(NewMember::active(format!("member{n:03}")))
            .await?;
        member_ids.push(member.id);
    }

    tracing::info!(
        concerts = concert_ids.len(),
        members = member_ids.len(),
        seats,
        "test data initialized"
    );

    Ok((
        StatusCode::CREATED,
        Json(InitResponse {
            concert_count: concert_ids.len(),
            member_count: member_ids.len(),
            concert_ids,
            member_ids,
            message: "Test data initialized".to_string(),
        }),
    ))
}
