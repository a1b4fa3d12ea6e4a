//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::config::{Config, LogFormat};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use sweeper::ExpirationSweeper;
use ticket_store::{InMemoryTicketStore, PostgresTicketStore, TicketStore};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Serves the API over `store` with the expiration sweeper running alongside.
async fn serve<S: TicketStore + Clone + 'static>(
    store: S,
    config: &Config,
    metrics_handle: PrometheusHandle,
) {
    let state = api::create_default_state(store, config.reservation_config());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ExpirationSweeper::new(Arc::clone(&state.reservations), config.sweeper_config())
        .spawn(shutdown_rx);

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "sweeper task failed");
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    describe_metrics();

    // 3. Pick the ticket store and serve
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .acquire_timeout(Duration::from_secs(3))
                .connect(url)
                .await
                .expect("failed to connect to database");
            let store = PostgresTicketStore::new(pool).with_lock_timeout(config.lock_timeout());
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL ticket store");
            serve(store, &config, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory ticket store");
            let store = InMemoryTicketStore::new().with_lock_timeout(config.lock_timeout());
            serve(store, &config, metrics_handle).await;
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "reservations_created_total",
        "Reservations committed in PENDING state"
    );
    metrics::describe_counter!(
        "reservations_rejected_total",
        "Reservation attempts rejected, labelled by reason"
    );
    metrics::describe_counter!(
        "reservation_retries_total",
        "Units of work rerun after a retryable failure"
    );
    metrics::describe_histogram!(
        "reservation_duration_seconds",
        metrics::Unit::Seconds,
        "Time spent in a reserve call including retries"
    );
    metrics::describe_counter!("sweeper_runs_total", "Completed sweeper passes");
    metrics::describe_counter!(
        "sweeper_failures_total",
        "Expired holds the sweeper failed to release"
    );
}
