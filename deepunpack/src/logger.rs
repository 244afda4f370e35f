use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::app_dirs;

/// Environment variable holding the log filter, e.g. `debug` or `scanner=trace`
pub const LOG_FILTER_ENV_VAR: &str = "DEEPUNPACK_LOG";
const LOG_FILE_NAME: &str = "deepunpack.log";

/// Install the global subscriber: a compact stderr layer plus a plain-text
/// file layer under the app logs directory.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process. Without a writable logs directory only the
/// stderr layer is installed and `None` is returned.
pub fn init_logger() -> Option<WorkerGuard> {
    let filter = env::var(LOG_FILTER_ENV_VAR).unwrap_or_else(|_| "info".to_string());
    let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .without_time()
        .compact();

    let logs_dir = app_dirs::get_logs_dir();
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        let _ = tracing_subscriber::registry()
            .with(stderr_layer)
            .with(filter_layer)
            .try_init();
        tracing::warn!("File logging disabled, cannot create {}: {}", logs_dir.display(), e);
        return None;
    }

    let file_appender = tracing_appender::rolling::never(&logs_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter_layer)
        .try_init();

    tracing::debug!("Logging to {}", logs_dir.join(LOG_FILE_NAME).display());
    Some(guard)
}
