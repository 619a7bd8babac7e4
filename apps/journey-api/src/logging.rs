//! Structured JSON logging setup using tracing.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber with JSON output.
///
/// `RUST_LOG` from the process environment takes precedence over `filter`.
///
/// # Panics
///
/// Panics if the subscriber has already been initialized.
pub fn init_logging(filter: &str) {
    let filter_layer =
        match EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(filter)) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("FATAL: Failed to create log filter: {e}");
                std::process::exit(1);
            }
        };

    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter_layer)
        .init();

    tracing::info!(filter = %filter, "Logging initialized");
}

#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}
