//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::ReservationConfig;
use sweeper::SweeperConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "text" | "pretty" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `plain` or `json` (default: `plain`)
/// - `DATABASE_URL` — PostgreSQL URL; unset selects the in-memory store
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `20`)
/// - `HOLD_WINDOW_SECS` — how long a PENDING reservation holds its seats (default: `300`)
/// - `SWEEP_INTERVAL_SECS` — time between expiration sweeps (default: `30`)
/// - `RESERVE_MAX_RETRIES` — retries on contention (default: `3`)
/// - `LOCK_TIMEOUT_MS` — bound on waiting for a busy concert (default: `2000`)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub hold_window_secs: i64,
    pub sweep_interval_secs: u64,
    pub reserve_max_retries: u32,
    pub lock_timeout_ms: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: parse_var(&lookup, "DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            hold_window_secs: parse_var(&lookup, "HOLD_WINDOW_SECS")
                .filter(|secs: &i64| *secs > 0)
                .unwrap_or(defaults.hold_window_secs),
            sweep_interval_secs: parse_var(&lookup, "SWEEP_INTERVAL_SECS")
                .filter(|secs: &u64| *secs > 0)
                .unwrap_or(defaults.sweep_interval_secs),
            reserve_max_retries: parse_var(&lookup, "RESERVE_MAX_RETRIES")
                .unwrap_or(defaults.reserve_max_retries),
            lock_timeout_ms: parse_var(&lookup, "LOCK_TIMEOUT_MS")
                .filter(|ms: &u64| *ms > 0)
                .unwrap_or(defaults.lock_timeout_ms),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Lifecycle settings derived from this configuration.
    pub fn reservation_config(&self) -> ReservationConfig {
        ReservationConfig::default()
            .with_hold_window(chrono::Duration::seconds(self.hold_window_secs))
            .with_max_retries(self.reserve_max_retries)
    }

    /// Sweeper settings derived from this configuration.
    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            ..SweeperConfig::default()
        }
    }

    /// Bound on waiting for a concert held by another writer.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
            database_url: None,
            database_max_connections: 20,
            hold_window_secs: 300,
            sweep_interval_secs: 30,
            reserve_max_retries: 3,
            lock_timeout_ms: 2_000,
        }
    }
}
