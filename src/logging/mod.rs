use crate::models::ProbeCycleLog;
use log::{debug, error, info, warn, LevelFilter};
use std::sync::Once;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: Once = Once::new();

/// Initialize the global logger from `RUST_LOG`, defaulting to `info`.
/// Only the first call has any effect.
pub fn init_logger_with_env() {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    init_logger_with_config(&level);
}

/// Initialize the global logger with an explicit filter directive
/// (`info`, `debug`, `redis_health_sidecar=trace`, ...).
pub fn init_logger_with_config(level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(false)
            .try_init();
        if let Err(e) = installed {
            eprintln!("Warning: Failed to install tracing subscriber: {}", e);
            return;
        }

        // Bridge `log` records; tracing-subscriber may already have done so.
        if LogTracer::init().is_err() {
            tracing::trace!("LogTracer already installed");
        }

        log::set_max_level(max_level_for(level));
    });
}

/// `log` crate ceiling matching a filter directive. Directive lists with
/// per-target levels fall back to the most verbose ceiling.
fn max_level_for(level: &str) -> LevelFilter {
    level.trim().parse::<LevelFilter>().unwrap_or(LevelFilter::Trace)
}

/// Log a finished poll cycle as JSON (debug level only)
pub fn log_probe_cycle(cycle: &ProbeCycleLog) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    match serde_json::to_string(cycle) {
        Ok(json) => debug!("POLL CYCLE: {}", json),
        Err(e) => warn!("Failed to serialize poll cycle {}: {}", cycle.cycle, e),
    }
}

/// Log an error message
pub fn log_error(message: &str) {
    error!("{}", message);
}

/// Log an info message
pub fn log_info(message: &str) {
    info!("{}", message);
}

/// Log a warning message
pub fn log_warning(message: &str) {
    warn!("{}", message);
}

/// Log a debug message
pub fn log_debug(message: &str) {
    debug!("{}", message);
}

/// Convenience macro for logging errors
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error(&format!($($arg)*));
    };
}

/// Convenience macro for logging info messages
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info(&format!($($arg)*));
    };
}

/// Convenience macro for logging warning messages
#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::logging::log_warning(&format!($($arg)*));
    };
}

/// Convenience macro for logging debug messages
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug(&format!($($arg)*));
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_level_for() {
        assert_eq!(max_level_for("warn"), LevelFilter::Warn);
        assert_eq!(max_level_for(" DEBUG "), LevelFilter::Debug);
        assert_eq!(max_level_for("info,redis_health_sidecar=trace"), LevelFilter::Trace);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logger_with_config("debug");
        init_logger_with_config("error");
        log_info!("logger initialised {} time(s)", 2);
        log_probe_cycle(&ProbeCycleLog::new(1, chrono::Utc::now()));
    }
}
