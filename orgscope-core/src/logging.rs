//! Logging setup for orgscope.
//!
//! Library code only emits `tracing` events. Binaries and tests that want to
//! see them call [`init`], which installs a `tracing-subscriber` when the
//! `tracing-subscriber` feature is enabled.
//!
//! # Environment Variables
//!
//! - `ORGSCOPE_DEBUG=true|1|yes` - Enable debug logging
//! - `ORGSCOPE_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `ORGSCOPE_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! # Targets
//!
//! Privileged access is recorded on the `orgscope::audit` target at `info`
//! level. It is enabled whenever logging is initialized, regardless of
//! `ORGSCOPE_LOG_LEVEL`.
//!
//! ```rust,no_run
//! orgscope_core::logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Tracing target for privileged access records.
pub const AUDIT_TARGET: &str = "orgscope::audit";

fn flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Whether `ORGSCOPE_DEBUG` is set to a truthy value.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("ORGSCOPE_DEBUG").map(|v| flag(&v)).unwrap_or(false)
}

/// Level from `ORGSCOPE_LOG_LEVEL`, falling back to `debug` or `warn`.
pub fn get_log_level() -> &'static str {
    let fallback = if is_debug_enabled() { "debug" } else { "warn" };
    match env::var("ORGSCOPE_LOG_LEVEL") {
        Ok(level) => match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// Format from `ORGSCOPE_LOG_FORMAT`. Defaults to `json`.
pub fn get_log_format() -> &'static str {
    env::var("ORGSCOPE_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Filter directive for the given level, keeping audit records visible.
pub fn filter_directive(level: &str) -> String {
    format!(
        "orgscope={level},orgscope_core={level},orgscope_postgres={level},orgscope_axum={level},orgscope_cli={level},{AUDIT_TARGET}=info"
    )
}

/// Install the global subscriber once, writing to stderr. Later calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(filter_directive(level))
                .unwrap_or_else(|_| EnvFilter::new("warn"));

            let registry = tracing_subscriber::registry().with(filter);
            let installed = match get_log_format() {
                "json" => registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init(),
                "compact" => registry.with(fmt::layer().compact().with_writer(std::io::stderr)).try_init(),
                _ => registry.with(fmt::layer().pretty().with_writer(std::io::stderr)).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(
                    level = level,
                    format = get_log_format(),
                    "orgscope logging initialized"
                );
            }
        }
    });
}
