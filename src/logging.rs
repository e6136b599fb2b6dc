use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,admission_control=trace
///
/// Setting `ADMISSION_LOG_FORMAT=json` switches to one JSON object per line,
/// which is what log shippers in front of a fleet usually expect.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("ADMISSION_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_current_span(false))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true) // concurrency issues are the usual suspect
                        .with_line_number(true),
                )
                .init();
        }

        tracing::info!(json, "Logging initialized");
    });
}

/// Macro for logging admission decisions
#[macro_export]
macro_rules! admission_event {
    ($scope:expr, $identity:expr, $decision:expr) => {
        tracing::debug!(
            scope = $scope,
            identity = $identity,
            allowed = $decision.allowed,
            used_burst = $decision.used_burst,
            limit = $decision.limit,
            remaining = $decision.remaining,
            reset_at_ms = $decision.reset_at_ms,
            "Admission check"
        )
    };
}

/// Macro for logging storage operations with timing
#[macro_export]
macro_rules! storage_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
