//! HTTP reservation gateway with observability for the ticketing system.
//!
//! Provides REST endpoints for reserving, confirming and cancelling seats,
//! inventory audit and test-data bootstrap, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{InventoryAudit, ReservationConfig, ReservationService};
use metrics_exporter_prometheus::PrometheusHandle;
use ticket_store::TicketStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: TicketStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/api/reservations", post(routes::reservations::create::<S>))
        .route("/api/reservations/{id}", get(routes::reservations::get::<S>))
        .route(
            "/api/reservations/{id}/tickets",
            get(routes::reservations::tickets::<S>),
        )
        .route(
            "/api/reservations/{id}/confirm",
            post(routes::reservations::confirm::<S>),
        )
        .route(
            "/api/reservations/{id}/cancel",
            post(routes::reservations::cancel::<S>),
        )
        .route(
            "/api/reservations/number/{number}",
            get(routes::reservations::by_number::<S>),
        )
        .route(
            "/api/members/{id}/reservations",
            get(routes::reservations::for_member::<S>),
        )
        .route("/api/concerts", get(routes::concerts::list::<S>))
        .route("/api/concerts/{id}", get(routes::concerts::get::<S>))
        .route(
            "/api/concerts/{id}/inventory",
            get(routes::concerts::inventory::<S>),
        )
        .route("/api/inventory/report", get(routes::concerts::report::<S>))
        .route("/api/test/init", post(routes::bootstrap::init::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over a ticket store.
pub fn create_default_state<S: TicketStore + Clone + 'static>(
    store: S,
    config: ReservationConfig,
) -> Arc<AppState<S>> {
    let reservations = ReservationService::new(store.clone()).with_config(config);
    create_state(store, reservations)
}

/// Creates the application state around an already configured service.
pub fn create_state<S: TicketStore + Clone + 'static>(
    store: S,
    reservations: ReservationService<S>,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        reservations: Arc::new(reservations),
        audit: InventoryAudit::new(store.clone()),
        store,
    })
}
