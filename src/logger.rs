//! Console and rolling-file logging.
//!
//! Both sinks receive the same events. The file rotates once it passes
//! [`ROTATION_BYTES`] and rotated files older than [`RETENTION_DAYS`] are removed.

use std::{io::IsTerminal, sync::Mutex};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Settings;
use crate::error::{ExtractError, Result};

pub const ROTATION_BYTES: usize = 10 * 1024 * 1024;
pub const RETENTION_DAYS: i64 = 7;

/// Installs the global subscriber. `RUST_LOG` wins over `settings.log_level`.
pub fn init(settings: &Settings) -> Result<()> {
    if let Some(parent) = settings.log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.log_level.to_ascii_lowercase()))
        .map_err(|e| ExtractError::Logging(format!("invalid log level '{}': {e}", settings.log_level)))?;

    let rotating = FileRotate::new(
        &settings.log_file,
        AppendTimestamp::default(FileLimit::Age(chrono::Duration::days(RETENTION_DAYS))),
        ContentLimit::BytesSurpassed(ROTATION_BYTES),
        Compression::None,
        #[cfg(unix)]
        None,
    );

    let console = fmt::layer()
        .with_ansi(colorize(&std::io::stdout()))
        .with_line_number(true);
    let file = fmt::layer()
        .with_ansi(false)
        .with_line_number(true)
        .with_writer(Mutex::new(rotating));

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| ExtractError::Logging(e.to_string()))
}

/// Colour codes only go to interactive streams.
pub fn colorize(stream: &impl IsTerminal) -> bool {
    stream.is_terminal()
}

pub fn log_start_process(process_name: &str) {
    tracing::info!("A process is starting: {process_name}");
}

pub fn log_end_process(process_name: &str) {
    tracing::info!("Ending a process: {process_name}");
}

pub fn log_error(error: &dyn std::error::Error, process_name: Option<&str>) {
    match process_name {
        Some(name) => tracing::error!("Error in process {name}: {error}"),
        None => tracing::error!("Error: {error}"),
    }
}
