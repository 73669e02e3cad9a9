//! # Observability
//!
//! Tracing subscriber setup, Prometheus exporter and controller metrics.
//!
//! ## Usage
//!
//! ```ignore
//! observability::init_logging(&LoggingConfig::from_verbosity(LogFormat::Compact, 1, false))?;
//! observability::init_metrics_only(9000)?;
//!
//! let snapshot = hub.publish(snapshot);
//! observability::record_snapshot_metrics(&snapshot);
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use crate::metrics::{
    record_alert_outcome, record_detection_report, record_snapshot_metrics,
    ControllerMetricsAggregator, MetricsSummary, RunningStats, StatsSummary,
};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured JSON lines
    Json,
    #[default]
    Pretty,
    /// Single-line human readable
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub log_format: LogFormat,
    /// Used when `RUST_LOG` is not set
    pub default_log_level: String,
    /// Apply `default_log_level` even when `RUST_LOG` is set
    pub ignore_env: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            default_log_level: "info".to_string(),
            ignore_env: false,
        }
    }
}

impl LoggingConfig {
    /// Level from a `-v` count; `quiet` pins the filter to warnings.
    pub fn from_verbosity(log_format: LogFormat, verbose: u8, quiet: bool) -> Self {
        let level = match (quiet, verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        };
        Self {
            log_format,
            default_log_level: level.to_string(),
            ignore_env: quiet,
        }
    }

    fn filter(&self) -> EnvFilter {
        if self.ignore_env {
            return EnvFilter::new(&self.default_log_level);
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_log_level))
    }
}

/// Install the global tracing subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(config.filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    tracing::debug!(
        log_format = ?config.log_format,
        level = %config.default_log_level,
        "Logging initialized"
    );
    Ok(())
}

/// Prometheus exporter only, for callers that set up tracing themselves
pub fn init_metrics_only(port: u16) -> Result<()> {
    let builder = PrometheusBuilder::new();
    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;

    tracing::info!(port = port, "Prometheus metrics endpoint initialized");
    Ok(())
}
