//! Server configuration loaded from `TALKIFY_*` environment variables.
//!
//! # Environment Variables
//!
//! - `TALKIFY_HTTP_ADDR`: HTTP/WebSocket bind address. Default: `0.0.0.0:8080`
//! - `TALKIFY_DB_PATH`: libSQL database file. Default: in-memory
//! - `TALKIFY_JWT_SECRET`: HS256 signing secret, at least 32 characters. Required
//! - `TALKIFY_JWT_TTL_SECS`: Token lifetime in seconds. Default: `86400`
//! - `TALKIFY_OUTBOUND_CAPACITY`: Per-connection outbound queue size. Default: `256`
//! - `TALKIFY_COMMAND_CAPACITY`: Hub control channel size. Default: `1024`
//! - `TALKIFY_IDLE_TIMEOUT_SECS`: Close silent connections after this long, `0` disables. Default: `300`
//! - `TALKIFY_LOG_FORMAT`: `pretty` or `json`. Default: `pretty`

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use talkify_relay::{HubConfig, DEFAULT_OUTBOUND_CAPACITY};
use thiserror::Error;
use tracing::info;

/// Minimum accepted JWT secret length.
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    /// `None` runs on an in-memory database
    pub db_path: Option<String>,
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    pub outbound_capacity: usize,
    pub command_capacity: usize,
    pub idle_timeout: Option<Duration>,
    pub log_format: LogFormat,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("db_path", &self.db_path)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_ttl", &self.jwt_ttl)
            .field("outbound_capacity", &self.outbound_capacity)
            .field("command_capacity", &self.command_capacity)
            .field("idle_timeout", &self.idle_timeout)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration using `lookup` to read variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let http_addr = parse_or(&lookup, "TALKIFY_HTTP_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let db_path = lookup("TALKIFY_DB_PATH").filter(|p| !p.trim().is_empty());

        let jwt_secret = lookup("TALKIFY_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("TALKIFY_JWT_SECRET"))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "TALKIFY_JWT_SECRET",
                reason: format!("must be at least {} characters", MIN_JWT_SECRET_LEN),
            });
        }

        let jwt_ttl_secs: u64 = parse_or(&lookup, "TALKIFY_JWT_TTL_SECS", 86_400)?;
        if jwt_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "TALKIFY_JWT_TTL_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let outbound_capacity =
            parse_positive(&lookup, "TALKIFY_OUTBOUND_CAPACITY", DEFAULT_OUTBOUND_CAPACITY)?;
        let command_capacity = parse_positive(&lookup, "TALKIFY_COMMAND_CAPACITY", 1024)?;

        let idle_secs: u64 = parse_or(&lookup, "TALKIFY_IDLE_TIMEOUT_SECS", 300)?;
        let idle_timeout = (idle_secs > 0).then(|| Duration::from_secs(idle_secs));

        let log_format = parse_or(&lookup, "TALKIFY_LOG_FORMAT", LogFormat::Pretty)?;

        Ok(Self {
            http_addr,
            db_path,
            jwt_secret,
            jwt_ttl: Duration::from_secs(jwt_ttl_secs),
            outbound_capacity,
            command_capacity,
            idle_timeout,
            log_format,
        })
    }

    /// Hub settings derived from this configuration.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            command_capacity: self.command_capacity,
            outbound_capacity: self.outbound_capacity,
            idle_timeout: self.idle_timeout,
        }
    }

    /// Log the effective configuration. The JWT secret is never logged.
    pub fn log_config(&self) {
        info!("HTTP address: {}", self.http_addr);
        match &self.db_path {
            Some(path) => info!("Database: {}", path),
            None => info!("Database: in-memory (development mode)"),
        }
        info!("JWT lifetime: {}s", self.jwt_ttl.as_secs());
        info!(
            outbound_capacity = self.outbound_capacity,
            command_capacity = self.command_capacity,
            idle_timeout_secs = self.idle_timeout.map(|d| d.as_secs()).unwrap_or(0),
            "Relay settings"
        );
    }

    /// Create a test configuration.
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            db_path: None,
            jwt_secret: "test-secret-that-is-at-least-32-bytes".to_string(),
            jwt_ttl: Duration::from_secs(3600),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            command_capacity: 64,
            idle_timeout: None,
            log_format: LogFormat::Pretty,
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

fn parse_positive<F>(lookup: &F, name: &'static str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: usize = parse_or(lookup, name, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("TALKIFY_JWT_SECRET", SECRET)]).unwrap();

        assert_eq!(config.http_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.db_path, None);
        assert_eq!(config.jwt_ttl, Duration::from_secs(86_400));
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.command_capacity, 1024);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TALKIFY_JWT_SECRET", SECRET),
            ("TALKIFY_HTTP_ADDR", "127.0.0.1:9000"),
            ("TALKIFY_DB_PATH", "/tmp/talkify.db"),
            ("TALKIFY_JWT_TTL_SECS", "60"),
            ("TALKIFY_OUTBOUND_CAPACITY", "32"),
            ("TALKIFY_IDLE_TIMEOUT_SECS", "0"),
            ("TALKIFY_LOG_FORMAT", "JSON"),
        ])
        .unwrap();

        assert_eq!(config.http_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.db_path.as_deref(), Some("/tmp/talkify.db"));
        assert_eq!(config.jwt_ttl, Duration::from_secs(60));
        assert_eq!(config.outbound_capacity, 32);
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.log_format, LogFormat::Json);

        let hub = config.hub_config();
        assert_eq!(hub.outbound_capacity, 32);
        assert_eq!(hub.idle_timeout, None);
    }

    #[test]
    fn test_missing_secret() {
        assert_eq!(
            load(&[]).unwrap_err(),
            ConfigError::Missing("TALKIFY_JWT_SECRET")
        );
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = load(&[("TALKIFY_JWT_SECRET", "too-short")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "TALKIFY_JWT_SECRET",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = load(&[
            ("TALKIFY_JWT_SECRET", SECRET),
            ("TALKIFY_OUTBOUND_CAPACITY", "lots"),
        ])
        .unwrap_err();
        assert!(err.to_string().starts_with("TALKIFY_OUTBOUND_CAPACITY is invalid"));

        let err = load(&[
            ("TALKIFY_JWT_SECRET", SECRET),
            ("TALKIFY_COMMAND_CAPACITY", "0"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("TALKIFY_COMMAND_CAPACITY"));

        let err = load(&[
            ("TALKIFY_JWT_SECRET", SECRET),
            ("TALKIFY_LOG_FORMAT", "xml"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("unknown log format"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = load(&[("TALKIFY_JWT_SECRET", SECRET)]).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains(SECRET));
        assert!(debug.contains("<redacted>"));
    }
}
