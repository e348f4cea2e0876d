//! Tracing subscriber setup driven by pmoconfig

use pmoconfig::Config;
use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter, Registry};

fn string_to_level(level: &str) -> Option<Level> {
    match level.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

/// Install the global subscriber
///
/// The level comes from `host.logger.min_level`; `RUST_LOG` takes precedence
/// when set. The console layer is only added if `host.logger.enable_console`
/// is true.
pub fn init_logging(config: &Config) {
    let level = config
        .get_log_min_level()
        .ok()
        .as_deref()
        .and_then(string_to_level)
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let subscriber = Registry::default().with(filter);

    if config.get_log_enable_console().unwrap_or(true) {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    } else {
        subscriber.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_level() {
        assert_eq!(string_to_level("debug"), Some(Level::DEBUG));
        assert_eq!(string_to_level(" WARNING "), Some(Level::WARN));
        assert_eq!(string_to_level("verbose"), None);
    }
}
