//! Configuration module for environment variable parsing.
//!
//! Reads all configuration from environment variables once at startup.
//! Missing required values are a fatal error rather than a degraded mode.

use std::env;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

/// Default port for the web server.
pub const DEFAULT_PORT: u16 = 8000;

/// Default tracing filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors raised while loading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("invalid DATABASE_URL {url:?}: {reason}")]
    InvalidDatabaseUrl { url: String, reason: &'static str },
}

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// SQLite location, e.g. `sqlite:////data/app.db`
    pub database_url: String,

    /// Shared secret used as the HMAC-SHA256 key for `X-Signature`
    pub webhook_secret: String,

    /// Default log filter (overridden by `RUST_LOG`)
    pub log_level: String,
}

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let webhook_secret = required("WEBHOOK_SECRET")?;
        let database_url = required("DATABASE_URL")?;

        // Validate eagerly so a bad URL fails at startup, not on first query.
        parse_database_url(&database_url)?;

        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(env_var = "PORT", value = %raw, "Invalid port, using default");
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        let log_level = lookup("LOG_LEVEL")
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Config {
            port,
            database_url,
            webhook_secret,
            log_level,
        })
    }

    /// Resolve `database_url` into a concrete location.
    pub fn database_location(&self) -> Result<DatabaseLocation, ConfigError> {
        parse_database_url(&self.database_url)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("webhook_secret", &"<redacted>")
            .field("log_level", &self.log_level)
            .finish()
    }
}

/// Parse a `sqlite:` URL.
///
/// Supported forms:
/// - `sqlite:////data/app.db` (absolute)
/// - `sqlite:////./app.db` (relative to the working directory)
/// - `sqlite::memory:`
fn parse_database_url(url: &str) -> Result<DatabaseLocation, ConfigError> {
    let invalid = |reason| ConfigError::InvalidDatabaseUrl {
        url: url.to_string(),
        reason,
    };

    let rest = url
        .strip_prefix("sqlite:")
        .ok_or_else(|| invalid("scheme must be sqlite:"))?;

    if rest == ":memory:" {
        return Ok(DatabaseLocation::Memory);
    }

    let path = rest.trim_start_matches('/');
    if path.is_empty() {
        return Err(invalid("missing database path"));
    }

    if path.starts_with("./") || path.starts_with("../") || rest.len() == path.len() {
        Ok(DatabaseLocation::File(PathBuf::from(path)))
    } else {
        Ok(DatabaseLocation::File(PathBuf::from(format!("/{}", path))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("WEBHOOK_SECRET", "testsecret"),
            ("DATABASE_URL", "sqlite:////data/app.db"),
        ]))
        .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.webhook_secret, "testsecret");
        assert_eq!(config.log_level, "info");
        assert_eq!(
            config.database_location().unwrap(),
            DatabaseLocation::File(PathBuf::from("/data/app.db"))
        );
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let err = Config::from_lookup(lookup(&[("DATABASE_URL", "sqlite::memory:")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("WEBHOOK_SECRET"));

        let err = Config::from_lookup(lookup(&[
            ("WEBHOOK_SECRET", "   "),
            ("DATABASE_URL", "sqlite::memory:"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("WEBHOOK_SECRET"));
    }

    #[test]
    fn test_missing_database_url_is_fatal() {
        let err = Config::from_lookup(lookup(&[("WEBHOOK_SECRET", "s")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("WEBHOOK_SECRET", "s"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("PORT", "9090"),
            ("LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.database_location().unwrap(), DatabaseLocation::Memory);
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let config = Config::from_lookup(lookup(&[
            ("WEBHOOK_SECRET", "s"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("PORT", "not-a-port"),
        ]))
        .unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_database_url() {
        assert_eq!(
            parse_database_url("sqlite:////./app.db").unwrap(),
            DatabaseLocation::File(PathBuf::from("./app.db"))
        );
        assert_eq!(
            parse_database_url("sqlite:app.db").unwrap(),
            DatabaseLocation::File(PathBuf::from("app.db"))
        );
        assert!(matches!(
            parse_database_url("postgres://localhost/app"),
            Err(ConfigError::InvalidDatabaseUrl { .. })
        ));
        assert!(matches!(
            parse_database_url("sqlite:////"),
            Err(ConfigError::InvalidDatabaseUrl { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = Config::from_lookup(lookup(&[
            ("WEBHOOK_SECRET", "supersecret"),
            ("DATABASE_URL", "sqlite::memory:"),
        ]))
        .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("supersecret"));
        assert!(rendered.contains("<redacted>"));
    }
}
