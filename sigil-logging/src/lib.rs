//! Structured logging setup for Sigil services

use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Output flavour for [`init_logging`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// One JSON object per event (production)
    Json,
    /// Human-readable lines (development, CLI)
    Console,
}

/// Initialize logging for a Sigil service
///
/// `RUST_LOG` takes precedence over `default_level`. Logs go to stderr so
/// command output on stdout stays machine-readable.
pub fn init_logging(service_name: &str, default_level: &str, output: Output) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    match output {
        Output::Json => {
            // try_init: a subscriber may already be installed (tests, embedding)
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_current_span(false)
                        .with_span_list(false),
                )
                .try_init();
        }
        Output::Console => {
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true),
                )
                .try_init();
        }
    }

    tracing::debug!(
        service = service_name,
        output = ?output,
        "Logging initialized"
    );
}
