//! # Cells Telemetry
//!
//! Structured logging and Prometheus metrics for the cells workspace.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cells_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _metrics = init_telemetry(&TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CELLS_SERVICE_NAME` | `cells` | Service name in logs |
//! | `CELLS_LOG_LEVEL` | `info` | Log level filter |
//! | `CELLS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `CELLS_JSON_LOGS` | `false` | JSON log lines |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_test_tracing, init_tracing};
pub use metrics::{encode_metrics, register_metrics, HistogramTimer, MetricsHandle};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Install logging and register metrics.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<MetricsHandle, TelemetryError> {
    let metrics = register_metrics()?;
    init_tracing(config)?;
    Ok(metrics)
}
