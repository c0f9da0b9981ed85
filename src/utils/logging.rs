//! Logging setup and output directories

use anyhow::Result;
use std::fs;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_DIR: &str = "output/logs";
pub const OPPORTUNITY_DIR: &str = "output/opportunities";
const LOG_FILE: &str = "xarb-aggregator.log";

/// Keeps the file writer flushing until dropped
pub struct LoggingGuard {
    pub _guard: WorkerGuard,
}

/// Console plus an hourly rolling file. The file layer writes JSON lines
/// when `json` is set. Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn setup_logging(json: bool) -> Result<Arc<LoggingGuard>> {
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::hourly(LOG_DIR, LOG_FILE));

    let file_layer = if json {
        fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(file_writer)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_ansi(false)
            .with_target(true)
            .with_writer(file_writer)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(true))
        .with(file_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()?;

    Ok(Arc::new(LoggingGuard { _guard: guard }))
}

pub fn setup_output_directories(record_opportunities: bool) -> Result<()> {
    fs::create_dir_all(LOG_DIR)?;
    if record_opportunities {
        fs::create_dir_all(OPPORTUNITY_DIR)?;
    }
    Ok(())
}
