//! Service Configuration Module
//!
//! One configuration struct per concern, each loaded from `ORDERFLOW_*`
//! environment variables with development defaults. A `.env` file is read
//! first when present.

use orderflow_storage::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use std::time::Duration;

use crate::db::DbConfig;
use crate::telemetry::LogFormat;

// ============================================================================
// ENV HELPERS
// ============================================================================

pub(crate) fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

pub(crate) fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

// ============================================================================
// HTTP SERVER
// ============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the HTTP listener binds to.
    pub bind_addr: String,
    /// Upper bound on a single request, enforced by middleware.
    pub request_timeout: Duration,
    /// How long in-flight work may continue after a shutdown signal.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            request_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(15),
        }
    }
}

impl ServerConfig {
    /// Environment variables:
    /// - `ORDERFLOW_BIND_ADDR` (default: 0.0.0.0:8080)
    /// - `ORDERFLOW_REQUEST_TIMEOUT_MS` (default: 10000)
    /// - `ORDERFLOW_SHUTDOWN_GRACE_MS` (default: 15000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_string("ORDERFLOW_BIND_ADDR", &defaults.bind_addr),
            request_timeout: env_millis("ORDERFLOW_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            shutdown_grace: env_millis("ORDERFLOW_SHUTDOWN_GRACE_MS", defaults.shutdown_grace),
        }
    }
}

// ============================================================================
// REDIS
// ============================================================================

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    /// Timeout applied to every cache command.
    pub op_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            op_timeout: Duration::from_secs(2),
        }
    }
}

impl CacheConfig {
    /// Environment variables:
    /// - `ORDERFLOW_REDIS_HOST`, `ORDERFLOW_REDIS_PORT`
    /// - `ORDERFLOW_REDIS_PASSWORD` (empty = none)
    /// - `ORDERFLOW_REDIS_DB` (default: 0)
    /// - `ORDERFLOW_REDIS_TIMEOUT_MS` (default: 2000)
    ///
    /// Entries always live for [`orderflow_core::DEFAULT_CACHE_TTL`].
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("ORDERFLOW_REDIS_HOST", &defaults.host),
            port: env_parse("ORDERFLOW_REDIS_PORT", defaults.port),
            password: std::env::var("ORDERFLOW_REDIS_PASSWORD")
                .ok()
                .filter(|p| !p.is_empty()),
            db: env_parse("ORDERFLOW_REDIS_DB", defaults.db),
            op_timeout: env_millis("ORDERFLOW_REDIS_TIMEOUT_MS", defaults.op_timeout),
        }
    }

    /// Connection URL in the form the redis client accepts.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

// ============================================================================
// KAFKA
// ============================================================================

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub group_id: String,
    pub topic: String,
    pub dead_letter_topic: String,
    /// Upper bound on waiting for a publish acknowledgement.
    pub message_timeout: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            group_id: "orderflow".to_string(),
            topic: "orders".to_string(),
            dead_letter_topic: "orders.dead-letter".to_string(),
            message_timeout: Duration::from_secs(5),
        }
    }
}

impl KafkaConfig {
    /// Environment variables:
    /// - `ORDERFLOW_KAFKA_BROKERS`: comma-separated (default: localhost:9092)
    /// - `ORDERFLOW_KAFKA_GROUP_ID` (default: orderflow)
    /// - `ORDERFLOW_KAFKA_TOPIC` (default: orders)
    /// - `ORDERFLOW_KAFKA_DEAD_LETTER_TOPIC` (default: orders.dead-letter)
    /// - `ORDERFLOW_KAFKA_MESSAGE_TIMEOUT_MS` (default: 5000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let brokers = std::env::var("ORDERFLOW_KAFKA_BROKERS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|b| !b.is_empty())
            .unwrap_or(defaults.brokers);

        Self {
            brokers,
            group_id: env_string("ORDERFLOW_KAFKA_GROUP_ID", &defaults.group_id),
            topic: env_string("ORDERFLOW_KAFKA_TOPIC", &defaults.topic),
            dead_letter_topic: env_string(
                "ORDERFLOW_KAFKA_DEAD_LETTER_TOPIC",
                &defaults.dead_letter_topic,
            ),
            message_timeout: env_millis(
                "ORDERFLOW_KAFKA_MESSAGE_TIMEOUT_MS",
                defaults.message_timeout,
            ),
        }
    }

    /// Broker list in librdkafka's `bootstrap.servers` form.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

// ============================================================================
// INGESTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Persist attempts per message, including the first.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub backoff: BackoffKind,
    /// Cap for exponential backoff.
    pub max_retry_delay: Duration,
    /// Pause after a failed fetch before polling again.
    pub fetch_retry_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            backoff: BackoffKind::Fixed,
            max_retry_delay: Duration::from_secs(60),
            fetch_retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl IngestConfig {
    /// Environment variables:
    /// - `ORDERFLOW_INGEST_MAX_ATTEMPTS` (default: 3)
    /// - `ORDERFLOW_INGEST_RETRY_DELAY_MS` (default: 5000)
    /// - `ORDERFLOW_INGEST_BACKOFF`: "fixed" or "exponential" (default: fixed)
    /// - `ORDERFLOW_INGEST_MAX_RETRY_DELAY_MS` (default: 60000)
    /// - `ORDERFLOW_INGEST_FETCH_RETRY_DELAY_MS` (default: 5000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let backoff = match std::env::var("ORDERFLOW_INGEST_BACKOFF")
            .map(|s| s.trim().to_lowercase())
            .as_deref()
        {
            Ok("exponential") => BackoffKind::Exponential,
            _ => BackoffKind::Fixed,
        };
        Self {
            max_attempts: env_parse("ORDERFLOW_INGEST_MAX_ATTEMPTS", defaults.max_attempts),
            retry_delay: env_millis("ORDERFLOW_INGEST_RETRY_DELAY_MS", defaults.retry_delay),
            backoff,
            max_retry_delay: env_millis(
                "ORDERFLOW_INGEST_MAX_RETRY_DELAY_MS",
                defaults.max_retry_delay,
            ),
            fetch_retry_delay: env_millis(
                "ORDERFLOW_INGEST_FETCH_RETRY_DELAY_MS",
                defaults.fetch_retry_delay,
            ),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.backoff {
            BackoffKind::Fixed => RetryPolicy::fixed(self.max_attempts, self.retry_delay),
            BackoffKind::Exponential => RetryPolicy::exponential_jitter(
                self.max_attempts,
                self.retry_delay,
                self.max_retry_delay,
            ),
        }
    }
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// Everything the service binary needs to start.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub cache: CacheConfig,
    pub kafka: KafkaConfig,
    pub ingest: IngestConfig,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load `.env` (if any) and then every section from the environment.
    pub fn load() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                eprintln!("Ignoring unreadable .env file: {}", err);
            }
        }
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            db: DbConfig::from_env(),
            cache: CacheConfig::from_env(),
            kafka: KafkaConfig::from_env(),
            ingest: IngestConfig::from_env(),
            log_format: LogFormat::from_env(),
        }
    }
}
