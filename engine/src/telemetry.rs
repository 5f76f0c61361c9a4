//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. Pretty output in
//! debug builds, JSON lines in release builds so scheduler logs can be
//! ingested as-is.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter directive for a log level
///
/// The level applies globally and to the engine crate explicitly, so a
/// noisy dependency can be quieted through `RUST_LOG` without losing
/// pipeline events.
pub fn filter_directive(log_level: &str) -> String {
    format!("{},draftmill_engine={}", log_level, log_level)
}

/// Initialize the tracing subscriber with the given log level from config.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info"
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}

/// Initialize the tracing subscriber at "info"
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_parses() {
        let directive = filter_directive("debug");
        assert_eq!(directive, "debug,draftmill_engine=debug");
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
