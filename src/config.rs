//! Configuration loading from environment variables.
//!
//! All fields are read from `SIGNAL_<SECTION>_<FIELD>` variables; the three
//! identity variables are mandatory, everything else carries a default.
//! Mirrors the two-tier raw/validated shape used elsewhere in this codebase
//! for TOML config, adapted to env vars since a single-process bot has no
//! fleet of config files to manage.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Configuration {
    pub phone_number: String,
    pub service_url: String,
    pub api_url: String,
    pub worker_pool_size: usize,
    pub queue_capacity: usize,
    pub backpressure: BackpressurePolicy,
    pub storage: StorageKind,
    pub durable_queue_enabled: bool,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub dlq: DlqConfig,
    pub log_redaction_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    Block,
    DropOldest,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    EmbeddedSql,
    KeyValue,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub rolling_window: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct DlqConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    pub jitter: f64,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn required(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingField(name.to_string()))
}

fn optional_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}='{value}'"))),
    }
}

/// Load configuration from the process environment.
pub fn load_config() -> Result<Configuration, ConfigError> {
    let phone_number = required("SIGNAL_PHONE_NUMBER")?;
    let service_url = required("SIGNAL_SERVICE_URL")?;
    let api_url = required("SIGNAL_API_URL")?;

    let worker_pool_size = optional_parsed("SIGNAL_WORKER_POOL_SIZE", 4usize)?;
    let queue_capacity = optional_parsed("SIGNAL_QUEUE_CAPACITY", 200usize)?;

    let backpressure = match env::var("SIGNAL_BACKPRESSURE").as_deref() {
        Err(_) => BackpressurePolicy::Block,
        Ok("block") => BackpressurePolicy::Block,
        Ok("drop_oldest") => BackpressurePolicy::DropOldest,
        Ok("reject") => BackpressurePolicy::Reject,
        Ok(other) => {
            return Err(ConfigError::InvalidValue(format!(
                "SIGNAL_BACKPRESSURE='{other}'"
            )));
        }
    };

    let storage = match env::var("SIGNAL_STORAGE").as_deref() {
        Err(_) => StorageKind::Memory,
        Ok("memory") => StorageKind::Memory,
        Ok("embedded_sql") => StorageKind::EmbeddedSql,
        Ok("key_value") => StorageKind::KeyValue,
        Ok(other) => return Err(ConfigError::InvalidValue(format!("SIGNAL_STORAGE='{other}'"))),
    };

    let durable_queue_enabled = optional_parsed("SIGNAL_DURABLE_QUEUE_ENABLED", false)?;

    let rate_limit = RateLimitConfig {
        capacity: optional_parsed("SIGNAL_RATE_LIMIT_CAPACITY", 2u32)?,
        refill_per_second: optional_parsed("SIGNAL_RATE_LIMIT_REFILL_PER_SECOND", 2.0f64)?,
    };

    let circuit_breaker = CircuitBreakerConfig {
        failure_threshold: optional_parsed("SIGNAL_CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5u32)?,
        open_duration: Duration::from_secs(optional_parsed(
            "SIGNAL_CIRCUIT_BREAKER_OPEN_DURATION_SECS",
            30u64,
        )?),
        rolling_window: Duration::from_secs(optional_parsed(
            "SIGNAL_CIRCUIT_BREAKER_ROLLING_WINDOW_SECS",
            60u64,
        )?),
    };

    let dlq = DlqConfig {
        max_attempts: optional_parsed("SIGNAL_DLQ_MAX_ATTEMPTS", 5u32)?,
        initial_backoff: Duration::from_secs(optional_parsed("SIGNAL_DLQ_INITIAL_BACKOFF_SECS", 5u64)?),
        multiplier: optional_parsed("SIGNAL_DLQ_MULTIPLIER", 2.0f64)?,
        max_backoff: Duration::from_secs(optional_parsed("SIGNAL_DLQ_MAX_BACKOFF_SECS", 300u64)?),
        jitter: optional_parsed("SIGNAL_DLQ_JITTER", 0.1f64)?,
    };

    let log_redaction_enabled = optional_parsed("SIGNAL_LOG_REDACTION_ENABLED", true)?;

    if worker_pool_size == 0 {
        return Err(ConfigError::InvalidValue(
            "SIGNAL_WORKER_POOL_SIZE must be >= 1".to_string(),
        ));
    }
    if queue_capacity == 0 {
        return Err(ConfigError::InvalidValue(
            "SIGNAL_QUEUE_CAPACITY must be >= 1".to_string(),
        ));
    }

    Ok(Configuration {
        phone_number,
        service_url,
        api_url,
        worker_pool_size,
        queue_capacity,
        backpressure,
        storage,
        durable_queue_enabled,
        rate_limit,
        circuit_breaker,
        dlq,
        log_redaction_enabled,
    })
}
