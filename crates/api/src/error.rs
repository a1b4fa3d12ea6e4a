//! API error types with HTTP response mapping.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use domain::{RejectionCategory, ReservationError};
use serde::Serialize;
use ticket_store::StoreError;

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Reservation lifecycle rejection or failure.
    Reservation(ReservationError),
}

/// HTTP status for a rejection category.
pub fn status_for(category: RejectionCategory) -> StatusCode {
    match category {
        RejectionCategory::Capacity | RejectionCategory::Conflict => StatusCode::CONFLICT,
        RejectionCategory::NotFound => StatusCode::NOT_FOUND,
        RejectionCategory::InvalidState => StatusCode::BAD_REQUEST,
        RejectionCategory::Contention => StatusCode::SERVICE_UNAVAILABLE,
        RejectionCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "BAD_REQUEST",
        StatusCode::NOT_FOUND => "NOT_FOUND",
        StatusCode::CONFLICT => "CONFLICT",
        StatusCode::SERVICE_UNAVAILABLE => "SERVICE_UNAVAILABLE",
        _ => "INTERNAL_SERVER_ERROR",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Reservation(err) => (status_for(err.category()), err.to_string()),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %message, "internal server error");
        }

        let body = axum::Json(ErrorResponse {
            error: error_code(status),
            message,
        });
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return (status, [(header::RETRY_AFTER, "1")], body).into_response();
        }
        (status, body).into_response()
    }
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        ApiError::Reservation(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Reservation(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticket_store::{ConcertId, ReservationId, ReservationStatus};

    #[test]
    fn test_category_status_mapping() {
        let capacity = ApiError::from(ReservationError::CapacityExhausted {
            concert_id: ConcertId::new(1),
            requested: 1,
            available: 0,
        });
        assert_eq!(capacity.into_response().status(), StatusCode::CONFLICT);

        let not_found = ApiError::from(ReservationError::ConcertNotFound(ConcertId::new(1)));
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let conflict = ApiError::from(ReservationError::InvalidTransition {
            reservation_id: ReservationId::new(1),
            status: ReservationStatus::Confirmed,
            action: "confirm",
        });
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);

        let busy = ApiError::from(ReservationError::Contention {
            concert_id: ConcertId::new(1),
            attempts: 4,
        });
        let response = busy.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");

        let pool = ApiError::from(StoreError::Unavailable("pool timed out".into()));
        assert_eq!(
            pool.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
