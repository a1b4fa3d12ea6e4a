//! Expiration sweeper.
//!
//! Periodically finds PENDING reservations whose hold deadline has passed and
//! expires them through the reservation lifecycle, which returns their
//! tickets to the ledger and their count to the seat pool. Each reservation is
//! handled in its own unit of work, so one failure never blocks the rest of a
//! sweep.

use std::sync::Arc;
use std::time::Duration;

use domain::{RejectionCategory, ReservationError, ReservationService};
use ticket_store::TicketStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Maximum reservations expired per sweep.
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 500,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reservations found past their deadline.
    pub scanned: usize,
    /// Reservations moved to EXPIRED.
    pub expired: usize,
    /// Reservations confirmed or cancelled before the sweep reached them.
    pub skipped: usize,
    /// Reservations that could not be expired this time.
    pub failed: usize,
}

/// Expires reservations whose hold window has run out.
pub struct ExpirationSweeper<S> {
    service: Arc<ReservationService<S>>,
    config: SweeperConfig,
}

impl<S: TicketStore + 'static> ExpirationSweeper<S> {
    /// Creates a sweeper that expires through the given lifecycle service.
    pub fn new(service: Arc<ReservationService<S>>, config: SweeperConfig) -> Self {
        Self { service, config }
    }

    /// Runs a single sweep.
    ///
    /// Only failing to list due reservations is an error; per-reservation
    /// failures are counted in the report.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<SweepReport, ReservationError> {
        let now = self.service.clock().now();
        let due = self
            .service
            .store()
            .find_expired(now, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            scanned: due.len(),
            ..SweepReport::default()
        };

        for reservation_id in due {
            match self.service.expire(reservation_id).await {
                Ok(_) => report.expired += 1,
                Err(e)
                    if matches!(
                        e.category(),
                        RejectionCategory::Conflict | RejectionCategory::NotFound
                    ) =>
                {
                    debug!(%reservation_id, error = %e, "reservation settled before sweep");
                    report.skipped += 1;
                }
                Err(e) => {
                    metrics::counter!("sweeper_failures_total").increment(1);
                    warn!(%reservation_id, error = %e, "failed to expire reservation");
                    report.failed += 1;
                }
            }
        }

        metrics::counter!("sweeper_runs_total").increment(1);
        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "sweep complete"
            );
        }
        Ok(report)
    }

    /// Sweeps on every interval tick until `shutdown` flips to `true`.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Starting expiration sweeper"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        metrics::counter!("sweeper_failures_total").increment(1);
                        error!(error = %e, "sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Expiration sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Runs the sweeper on a background task.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
