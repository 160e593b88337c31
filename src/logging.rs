use std::env;
use std::path::Path;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable overriding the log filter, e.g. `tidydesk=debug`.
pub const LOG_ENV: &str = "TIDYDESK_LOG";

/// Installs the global subscriber: compact output on stderr, plus a plain-text
/// copy in `log_file` when one is given.
///
/// `TIDYDESK_LOG` wins over `default_level`. The returned guard flushes the
/// file writer on drop, so keep it alive for the whole program.
pub fn init_logger(default_level: &str, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = env::var(LOG_ENV).unwrap_or_else(|_| default_level.to_string());
    let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "tidydesk.log".into());
            let file_appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .without_time()
                .with_target(false)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter_layer)
        .try_init();

    if installed.is_ok() {
        debug!("Logging configured with filter '{}'", filter);
    }
    guard
}
