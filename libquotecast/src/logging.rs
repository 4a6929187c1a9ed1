//! Logging setup shared by the Quotecast binaries
//!
//! Output always goes to stderr. `RUST_LOG` wins when set; otherwise the
//! configured level applies to Quotecast's own crates while the HTTP stack
//! is held at `warn`.
//!
//! # Examples
//!
//! ```no_run
//! use libquotecast::logging::{LoggingConfig, LogFormat};
//!
//! // JSON lines at debug level
//! LoggingConfig::new(LogFormat::Json, "debug".to_string(), false).init();
//!
//! // Or take QUOTECAST_LOG_FORMAT / QUOTECAST_LOG_LEVEL from the environment
//! libquotecast::logging::init_default();
//! ```

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Crates whose chatter is capped at `warn` unless `RUST_LOG` says otherwise
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text output (no colors, for piping)
    Text,
    /// Machine-parseable JSON (one JSON object per line)
    Json,
    /// Pretty-printed with colors (for development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    /// Forces `debug`, overriding `level`
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Settings from `QUOTECAST_LOG_FORMAT` and `QUOTECAST_LOG_LEVEL`
    ///
    /// Unset or unparseable values fall back to text output at `info`.
    pub fn from_env() -> Self {
        let format = std::env::var("QUOTECAST_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);

        let level = std::env::var("QUOTECAST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self::new(format, level, false)
    }

    /// Filter directive used when `RUST_LOG` is not set
    pub fn directive(&self) -> String {
        let level = if self.verbose { "debug" } else { self.level.as_str() };

        let mut directive = level.to_string();
        for dependency in QUIET_DEPENDENCIES {
            directive.push_str(&format!(",{}=warn", dependency));
        }
        directive
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
    }

    /// Install the global subscriber
    ///
    /// Returns `false` if a subscriber was already installed, in which case
    /// the existing one is left in place.
    pub fn init(&self) -> bool {
        let filter = self.filter();

        let result = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(false)
                .try_init(),
        };

        result.is_ok()
    }
}

/// Initialize logging from `QUOTECAST_LOG_FORMAT` / `QUOTECAST_LOG_LEVEL`
pub fn init_default() -> bool {
    LoggingConfig::from_env().init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);

        // Case insensitive
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("Json".parse::<LogFormat>().unwrap(), LogFormat::Json);
    }

    #[test]
    fn test_log_format_from_str_invalid() {
        let result = "invalid".parse::<LogFormat>();
        assert!(result
            .unwrap_err()
            .contains("Invalid log format: 'invalid'"));
    }

    #[test]
    fn test_log_format_display_round_trips() {
        for format in [LogFormat::Text, LogFormat::Json, LogFormat::Pretty] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_directive_quiets_http_stack() {
        let config = LoggingConfig::new(LogFormat::Text, "info".to_string(), false);
        let directive = config.directive();
        assert!(directive.starts_with("info,"));
        assert!(directive.contains("reqwest=warn"));
        assert!(directive.contains("hyper=warn"));
    }

    #[test]
    fn test_verbose_overrides_level() {
        let config = LoggingConfig::new(LogFormat::Json, "error".to_string(), true);
        assert!(config.directive().starts_with("debug,"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("QUOTECAST_LOG_FORMAT", "json");
        std::env::set_var("QUOTECAST_LOG_LEVEL", "trace");
        let config = LoggingConfig::from_env();
        std::env::remove_var("QUOTECAST_LOG_FORMAT");
        std::env::remove_var("QUOTECAST_LOG_LEVEL");

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "trace");
        assert!(!config.verbose);
    }

    #[test]
    #[serial]
    fn test_from_env_falls_back() {
        std::env::set_var("QUOTECAST_LOG_FORMAT", "xml");
        std::env::remove_var("QUOTECAST_LOG_LEVEL");
        let config = LoggingConfig::from_env();
        std::env::remove_var("QUOTECAST_LOG_FORMAT");

        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_second_init_is_rejected_without_panicking() {
        let config = LoggingConfig::new(LogFormat::Text, "warn".to_string(), false);
        config.init();
        assert!(!config.init());
    }
}
