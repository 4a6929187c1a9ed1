//! Configuration management for Quotecast
//!
//! Settings come from an optional TOML file and are then overridden by
//! `QUOTECAST_*` environment variables. Credentials are normally supplied
//! only through the environment.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credentials::{SeedCredentials, SessionSettings};
use crate::error::{ConfigError, Result};
use crate::transport::{RetryPolicy, DEFAULT_MAX_RETRIES};

pub const DEFAULT_PDS_URL: &str = "https://bsky.social";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bluesky: BlueskyConfig,
    pub http: HttpConfig,
    pub schedule: ScheduleConfig,
    pub quotes: QuotesConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueskyConfig {
    pub pds_url: String,
    pub did: String,
    #[serde(skip_serializing)]
    pub access_jwt: String,
    #[serde(skip_serializing)]
    pub refresh_jwt: String,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            pds_url: DEFAULT_PDS_URL.to_string(),
            did: String::new(),
            access_jwt: String::new(),
            refresh_jwt: String::new(),
        }
    }
}

impl std::fmt::Debug for BlueskyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlueskyConfig")
            .field("pds_url", &self.pds_url)
            .field("did", &self.did)
            .field("access_jwt", &"[REDACTED]")
            .field("refresh_jwt", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout of a single HTTP request
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_str")]
    pub retry_backoff: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    #[serde(with = "duration_str")]
    pub post_interval: Duration,
    #[serde(with = "duration_str")]
    pub token_refresh_interval: Duration,
    /// Deadline for one whole post or refresh, retries included
    #[serde(with = "duration_str")]
    pub operation_timeout: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            post_interval: Duration::from_secs(60 * 60),
            token_refresh_interval: Duration::from_secs(45 * 60),
            operation_timeout: Duration::from_secs(2 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotesConfig {
    pub file: String,
}

impl Default for QuotesConfig {
    fn default() -> Self {
        Self {
            file: "quotes.json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, apply environment
    /// overrides and validate the result
    ///
    /// A missing config file is not an error; defaults are used instead.
    pub fn load() -> Result<Self> {
        Self::load_with_override(None)
    }

    /// Like [`Config::load`], reading `path` instead of the default location
    /// when one is given
    pub fn load_with_override(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string()),
            None => resolve_config_path()?,
        };
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Apply `QUOTECAST_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("QUOTECAST_PDS_URL") {
            self.bluesky.pds_url = value;
        }
        if let Some(value) = lookup("QUOTECAST_DID") {
            self.bluesky.did = value;
        }
        if let Some(value) = lookup("QUOTECAST_ACCESS_JWT") {
            self.bluesky.access_jwt = value;
        }
        if let Some(value) = lookup("QUOTECAST_REFRESH_JWT") {
            self.bluesky.refresh_jwt = value;
        }
        if let Some(value) = lookup("QUOTECAST_HTTP_TIMEOUT") {
            self.http.timeout = parse_duration("QUOTECAST_HTTP_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("QUOTECAST_MAX_RETRIES") {
            self.http.max_retries = value.trim().parse().map_err(|e| ConfigError::InvalidValue {
                field: "QUOTECAST_MAX_RETRIES".to_string(),
                reason: format!("{}", e),
            })?;
        }
        if let Some(value) = lookup("QUOTECAST_RETRY_BACKOFF") {
            self.http.retry_backoff = parse_duration("QUOTECAST_RETRY_BACKOFF", &value)?;
        }
        if let Some(value) = lookup("QUOTECAST_POST_INTERVAL") {
            self.schedule.post_interval = parse_duration("QUOTECAST_POST_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("QUOTECAST_TOKEN_REFRESH_INTERVAL") {
            self.schedule.token_refresh_interval =
                parse_duration("QUOTECAST_TOKEN_REFRESH_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("QUOTECAST_OPERATION_TIMEOUT") {
            self.schedule.operation_timeout =
                parse_duration("QUOTECAST_OPERATION_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("QUOTECAST_QUOTES_FILE") {
            self.quotes.file = value;
        }
        Ok(())
    }

    /// Check required fields and value ranges
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("bluesky.pds_url", &self.bluesky.pds_url),
            ("bluesky.did", &self.bluesky.did),
            ("bluesky.access_jwt", &self.bluesky.access_jwt),
            ("bluesky.refresh_jwt", &self.bluesky.refresh_jwt),
            ("quotes.file", &self.quotes.file),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field.to_string()).into());
            }
        }

        let durations = [
            ("http.timeout", self.http.timeout),
            ("schedule.post_interval", self.schedule.post_interval),
            (
                "schedule.token_refresh_interval",
                self.schedule.token_refresh_interval,
            ),
            ("schedule.operation_timeout", self.schedule.operation_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.http.max_retries, self.http.retry_backoff)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            pds_url: self.bluesky.pds_url.clone(),
            refresh_interval: self.schedule.token_refresh_interval,
            refresh_timeout: self.schedule.operation_timeout,
        }
    }

    pub fn seed_credentials(&self) -> SeedCredentials {
        SeedCredentials {
            access: SecretString::from(self.bluesky.access_jwt.clone()),
            refresh: SecretString::from(self.bluesky.refresh_jwt.clone()),
        }
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Resolve the configuration file path following XDG Base Directory conventions
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("QUOTECAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("quotecast").join("config.toml"))
}

/// Durations as humantime strings ("10s", "1h 30m")
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        humantime::parse_duration(value.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuotecastError;
    use serial_test::serial;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn complete_config() -> Config {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("QUOTECAST_DID", "did:plc:test"),
                ("QUOTECAST_ACCESS_JWT", "access"),
                ("QUOTECAST_REFRESH_JWT", "refresh"),
            ]))
            .unwrap();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bluesky.pds_url, "https://bsky.social");
        assert_eq!(config.http.timeout, Duration::from_secs(10));
        assert_eq!(config.http.max_retries, 3);
        assert_eq!(config.http.retry_backoff, Duration::from_secs(2));
        assert_eq!(config.schedule.post_interval, Duration::from_secs(3600));
        assert_eq!(config.schedule.token_refresh_interval, Duration::from_secs(2700));
        assert_eq!(config.quotes.file, "quotes.json");
    }

    #[test]
    fn test_required_fields_present() {
        assert!(complete_config().validate().is_ok());
    }

    #[test]
    fn test_missing_required_fields() {
        let result = Config::default().validate();
        match result {
            Err(QuotecastError::Config(ConfigError::MissingField(field))) => {
                assert_eq!(field, "bluesky.did");
            }
            other => panic!("Expected MissingField, got {:?}", other),
        }

        let mut config = complete_config();
        config.bluesky.refresh_jwt = "   ".to_string();
        assert!(matches!(
            config.validate(),
            Err(QuotecastError::Config(ConfigError::MissingField(_)))
        ));
    }

    #[test]
    fn test_custom_overrides() {
        let mut config = complete_config();
        config
            .apply_overrides(lookup(&[
                ("QUOTECAST_PDS_URL", "https://custom.social"),
                ("QUOTECAST_POST_INTERVAL", "30m"),
                ("QUOTECAST_HTTP_TIMEOUT", "5s"),
                ("QUOTECAST_MAX_RETRIES", "5"),
                ("QUOTECAST_RETRY_BACKOFF", "250ms"),
            ]))
            .unwrap();

        assert_eq!(config.bluesky.pds_url, "https://custom.social");
        assert_eq!(config.schedule.post_interval, Duration::from_secs(30 * 60));
        assert_eq!(config.http.timeout, Duration::from_secs(5));
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::new(5, Duration::from_millis(250))
        );
    }

    #[test]
    fn test_invalid_duration_override() {
        let mut config = complete_config();
        let result = config.apply_overrides(lookup(&[("QUOTECAST_POST_INTERVAL", "invalid")]));
        assert!(matches!(
            result,
            Err(QuotecastError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_invalid_retry_count_override() {
        let mut config = complete_config();
        let result = config.apply_overrides(lookup(&[("QUOTECAST_MAX_RETRIES", "-1")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = complete_config();
        config.schedule.token_refresh_interval = Duration::ZERO;
        match config.validate() {
            Err(QuotecastError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "schedule.token_refresh_interval");
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[bluesky]
pds_url = "https://pds.example"
did = "did:plc:fromfile"

[http]
timeout = "3s"
max_retries = 1
retry_backoff = "100ms"

[schedule]
post_interval = "2h"
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.bluesky.pds_url, "https://pds.example");
        assert_eq!(config.bluesky.did, "did:plc:fromfile");
        assert_eq!(config.http.timeout, Duration::from_secs(3));
        assert_eq!(config.http.max_retries, 1);
        assert_eq!(config.schedule.post_interval, Duration::from_secs(7200));
        // Sections and fields not in the file keep their defaults
        assert_eq!(config.schedule.token_refresh_interval, Duration::from_secs(2700));
        assert_eq!(config.quotes.file, "quotes.json");
    }

    #[test]
    fn test_load_from_path_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[http]\ntimeout = \"soon\"").unwrap();

        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(QuotecastError::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = complete_config();
        let output = format!("{:?}", config);
        assert!(output.contains("did:plc:test"));
        assert!(!output.contains("\"access\""));
        assert!(output.contains("[REDACTED]"));
    }

    #[test]
    fn test_serialize_skips_credentials() {
        let config = complete_config();
        let serialized = toml::to_string(&config).unwrap();
        assert!(!serialized.contains("access_jwt"));
        assert!(serialized.contains("post_interval = \"1h\""));
    }

    #[test]
    #[serial]
    fn test_load_uses_env_path_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[bluesky]\ndid = \"did:plc:file\"").unwrap();

        std::env::set_var("QUOTECAST_CONFIG", file.path());
        std::env::set_var("QUOTECAST_ACCESS_JWT", "env-access");
        std::env::set_var("QUOTECAST_REFRESH_JWT", "env-refresh");

        let result = Config::load();

        std::env::remove_var("QUOTECAST_CONFIG");
        std::env::remove_var("QUOTECAST_ACCESS_JWT");
        std::env::remove_var("QUOTECAST_REFRESH_JWT");

        let config = result.unwrap();
        assert_eq!(config.bluesky.did, "did:plc:file");
        assert_eq!(config.bluesky.access_jwt, "env-access");
    }

    #[test]
    #[serial]
    fn test_load_with_explicit_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[bluesky]\ndid = \"did:plc:explicit\"\naccess_jwt = \"a\"\nrefresh_jwt = \"r\""
        )
        .unwrap();
        std::env::set_var("QUOTECAST_CONFIG", "/nonexistent/ignored.toml");

        let result = Config::load_with_override(Some(file.path()));
        std::env::remove_var("QUOTECAST_CONFIG");

        let config = result.unwrap();
        assert_eq!(config.bluesky.did, "did:plc:explicit");
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        std::env::set_var("QUOTECAST_CONFIG", "/nonexistent/quotecast/config.toml");
        std::env::set_var("QUOTECAST_DID", "did:plc:env");
        std::env::set_var("QUOTECAST_ACCESS_JWT", "a");
        std::env::set_var("QUOTECAST_REFRESH_JWT", "r");

        let result = Config::load();

        for key in [
            "QUOTECAST_CONFIG",
            "QUOTECAST_DID",
            "QUOTECAST_ACCESS_JWT",
            "QUOTECAST_REFRESH_JWT",
        ] {
            std::env::remove_var(key);
        }

        let config = result.unwrap();
        assert_eq!(config.bluesky.pds_url, DEFAULT_PDS_URL);
        assert_eq!(config.bluesky.did, "did:plc:env");
    }
}
