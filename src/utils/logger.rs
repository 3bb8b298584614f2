//! Logging setup for the CLI

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Verbosity selected by `--verbose`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// Run progress and per-test outcomes
    Info,
    /// Adds callback traffic, media session lifecycle and phase timings
    Debug,
}

impl LogLevel {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }

    /// Filter used when `RUST_LOG` is unset. Dependencies stay at warn.
    fn directive(self) -> String {
        let level = match self {
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
        };
        format!("warn,{}={}", env!("CARGO_CRATE_NAME"), level)
    }
}

/// Install the global subscriber; `RUST_LOG` wins over `level` when set
pub fn init_logger(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_selects_debug() {
        assert_eq!(LogLevel::from_verbose(true), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbose(false), LogLevel::Info);
    }

    #[test]
    fn test_directive_keeps_dependencies_quiet() {
        assert_eq!(LogLevel::Debug.directive(), "warn,call_probe=DEBUG");
        assert!(EnvFilter::try_new(LogLevel::Info.directive()).is_ok());
    }
}
