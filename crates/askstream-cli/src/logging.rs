//! Diagnostic logging for the CLI
//!
//! Logs go to stderr so they never interleave with a streamed answer on
//! stdout. Quiet by default; set `RUST_LOG` for more.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or unparsable
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Build the filter from explicit directives, falling back to the default
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

pub fn init_logging() {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    tracing_subscriber::registry()
        .with(log_filter(directives.as_deref()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_is_quiet() {
        assert_eq!(log_filter(None).to_string(), "warn");
    }

    #[test]
    fn test_explicit_directives_win() {
        assert_eq!(
            log_filter(Some("askstream=debug")).to_string(),
            "askstream=debug"
        );
    }

    #[test]
    fn test_invalid_directives_fall_back() {
        assert_eq!(log_filter(Some("askstream=loud")).to_string(), "warn");
    }
}
