//! Logging and tracing setup.
//!
//! Every diagnostic of a marking run goes through `tracing`. Hosts and the
//! command-line driver install a subscriber once; later calls are ignored.

use std::sync::Once;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

/// Default filter directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Filter directive for a `-v` count: 0 info, 1 debug, 2+ trace.
pub fn filter_for_verbosity(verbosity: u64) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Initialize the global tracing subscriber with human-readable output.
///
/// This should be called once at program startup.
/// Subsequent calls are ignored.
pub fn init_tracing() {
    init_tracing_with_filter(DEFAULT_FILTER);
}

/// Like [`init_tracing`], with `default` used when `RUST_LOG` is unset.
pub fn init_tracing_with_filter(default: &str) {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter(default))
            .with(fmt_layer)
            .init();

        debug!("xfg-marker tracing initialized");
    });
}

/// Initialize tracing with JSON output for structured logging.
pub fn init_tracing_json() {
    init_tracing_json_with_filter(DEFAULT_FILTER);
}

pub fn init_tracing_json_with_filter(default: &str) {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true);

        tracing_subscriber::registry()
            .with(env_filter(default))
            .with(fmt_layer)
            .init();

        debug!("xfg-marker tracing initialized (JSON mode)");
    });
}

/// Macro for creating spans
#[macro_export]
macro_rules! span_trace {
    ($name:expr) => {
        tracing::info_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}

/// Macro for logging and returning errors
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let e = $err;
        tracing::error!("{}", e);
        e
    }};
    ($err:expr, $msg:expr) => {{
        let e = $err;
        tracing::error!(error = %e, message = $msg, "Operation failed");
        e
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_once() {
        // Should be callable multiple times without panic
        init_tracing();
        init_tracing();
        init_tracing_json();
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(filter_for_verbosity(0), "info");
        assert_eq!(filter_for_verbosity(1), "debug");
        assert_eq!(filter_for_verbosity(5), "trace");
    }

    #[test]
    fn test_span_creation() {
        init_tracing();
        let span = span_trace!("xfg_test", base = 0x1_4000_0000u64, width = "64-bit");
        let _guard = span.enter();
        info!("Inside span");
    }

    #[test]
    fn log_error_returns_value() {
        init_tracing();
        let e = log_error!(crate::error::XfgError::NoModule);
        assert_eq!(e.to_string(), "No module in the CPU view");
    }
}
