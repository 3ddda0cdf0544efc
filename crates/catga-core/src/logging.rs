//! Structured logging configuration, shared by every `catga-*` binary
//! and test harness.
//!
//! - `LOG_FORMAT=json` -> JSON output (log aggregation)
//! - anything else -> human-readable output (development)
//! - `RUST_LOG` -> standard level filter (default: info)

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize logging for `service_name`. Idempotent-ish: if a global
/// subscriber is already set, `try_init` fails silently rather than
/// panicking, so tests that call this repeatedly don't blow up.
pub fn init_logging(service_name: &str) {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format.eq_ignore_ascii_case("json") {
        let _ = registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .flatten_event(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init();
    } else {
        let _ = registry
            .with(fmt::layer().with_target(true).with_thread_ids(false).with_ansi(true))
            .try_init();
    }

    tracing::debug!(service = service_name, "logging initialized");
}

pub fn init_default_logging() {
    init_logging("catga");
}
