use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_DIR: &str = "./logs";
const LOG_FILE: &str = "tours_backend.log";

/// Console default when `RUST_LOG` is unset or does not parse.
const CONSOLE_DEFAULT: &str = "info";
/// The file keeps request detail but not sqlx statement noise.
const FILE_DIRECTIVES: &str = "debug,sqlx=warn,hyper=info";

fn console_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(CONSOLE_DEFAULT))
}

/// Stdout plus a daily rolling file. Hold the guard until exit or the last
/// buffered lines are lost.
pub fn init_tracing() -> WorkerGuard {
    let (file_writer, guard) = tracing_appender::non_blocking(rolling::daily(LOG_DIR, LOG_FILE));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(EnvFilter::new(FILE_DIRECTIVES));

    let rust_log = std::env::var("RUST_LOG").ok();
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(console_filter(rust_log.as_deref()));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(dir = LOG_DIR, "logging to console and file");
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_filter_falls_back_to_info() {
        assert_eq!(console_filter(None).to_string(), "info");
        assert_eq!(
            console_filter(Some("tours_backend=debug")).to_string(),
            "tours_backend=debug"
        );
    }
}
