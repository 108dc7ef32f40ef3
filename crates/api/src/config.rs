//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use engine::EngineConfig;
use notify::PublisherConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `4000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: Postgres connection string; unset runs on the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `NOTIFY_QUEUE_CAPACITY`: pending notifications before drops (default: `1024`)
/// - `MUTATION_MAX_ATTEMPTS`: runs per unit on transient failure (default: `3`)
/// - `MUTATION_RETRY_BACKOFF_MS`: linear retry step (default: `10`)
/// - `LOCK_TIMEOUT_MS`: in-memory per-key lock wait (default: `2000`)
/// - `DIRECTORY_FILE`: JSON file with products and locations; unset starts empty
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub notify_queue_capacity: usize,
    pub mutation_max_attempts: u32,
    pub mutation_retry_backoff_ms: u64,
    pub lock_timeout_ms: u64,
    pub directory_file: Option<String>,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env_or("LOG_FORMAT", defaults.log_format),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            notify_queue_capacity: env_or("NOTIFY_QUEUE_CAPACITY", defaults.notify_queue_capacity),
            mutation_max_attempts: env_or("MUTATION_MAX_ATTEMPTS", defaults.mutation_max_attempts),
            mutation_retry_backoff_ms: env_or(
                "MUTATION_RETRY_BACKOFF_MS",
                defaults.mutation_retry_backoff_ms,
            ),
            lock_timeout_ms: env_or("LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
            directory_file: std::env::var("DIRECTORY_FILE")
                .ok()
                .filter(|path| !path.is_empty()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_attempts: self.mutation_max_attempts.max(1),
            retry_backoff: Duration::from_millis(self.mutation_retry_backoff_ms),
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            queue_capacity: self.notify_queue_capacity,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            notify_queue_capacity: 1024,
            mutation_max_attempts: 3,
            mutation_retry_backoff_ms: 10,
            lock_timeout_ms: 2000,
            directory_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 4000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert!(config.directory_file.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_derived_library_configs() {
        let config = Config {
            mutation_max_attempts: 0,
            mutation_retry_backoff_ms: 25,
            notify_queue_capacity: 8,
            lock_timeout_ms: 500,
            ..Config::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.max_attempts, 1);
        assert_eq!(engine.retry_backoff, Duration::from_millis(25));
        assert_eq!(config.publisher_config().queue_capacity, 8);
        assert_eq!(config.lock_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
