// Logging module - Logging infrastructure
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when the configured level is unusable
pub const DEFAULT_FILTER: &str = "serial_bridge=info,warn";

/// Filter used with `--verbose`
pub const VERBOSE_FILTER: &str = "serial_bridge=debug,info";

/// Pick the filter directives.
///
/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
pub fn filter_directives(env_override: Option<&str>, log_level: &str, verbose: bool) -> String {
    match env_override {
        Some(directives) if !directives.trim().is_empty() => directives.to_string(),
        _ if verbose => VERBOSE_FILTER.to_string(),
        _ if log_level.trim().is_empty() => DEFAULT_FILTER.to_string(),
        _ => format!("serial_bridge={},warn", log_level.trim()),
    }
}

/// Initialize logging system.
///
/// Everything goes to stderr; in `serve` mode stdout carries the protocol.
pub fn init_logging(log_level: &str, verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let env_filter = EnvFilter::try_new(filter_directives(env.as_deref(), log_level, verbose))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .try_init()?;

    tracing::debug!("logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_selection() {
        assert_eq!(filter_directives(None, "info", false), DEFAULT_FILTER);
        assert_eq!(filter_directives(None, "trace", false), "serial_bridge=trace,warn");
        assert_eq!(filter_directives(None, "", false), DEFAULT_FILTER);
        assert_eq!(filter_directives(None, "info", true), VERBOSE_FILTER);
        assert_eq!(filter_directives(Some("trace"), "info", false), "trace");
        assert_eq!(filter_directives(Some("  "), "info", true), VERBOSE_FILTER);
    }

    #[test]
    fn test_logging_init_twice_fails_cleanly() {
        let first = init_logging("info", false);
        let second = init_logging("info", false);

        assert!(first.is_ok() || second.is_err());
        assert!(second.is_err());
    }
}
