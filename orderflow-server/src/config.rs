//! Service configuration, loaded from the environment
//!
//! Required keys are validated together so a misconfigured deployment reports
//! every missing variable at once instead of one per restart.

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use thiserror::Error;

use crate::db::Tables;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required envs: {}", .0.join(", "))]
    MissingEnv(Vec<String>),
    #[error("CACHE_CAP must be a positive integer, got {0}")]
    InvalidCacheCap(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: String,
    pub cache_cap: usize,
    pub pg: PgConfig,
    pub tables: Tables,
    pub kafka: KafkaConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub user: String,
    pub password: String,
    pub sslmode: String,
}

impl PgConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        let ssl_mode = self
            .sslmode
            .parse::<PgSslMode>()
            .unwrap_or(PgSslMode::Disable);
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.db)
            .username(&self.user)
            .password(&self.password)
            .ssl_mode(ssl_mode)
    }
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group: String,
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub threshold: u32,
    pub open_timeout: Duration,
    pub max_half_open: u32,
}

impl Config {
    /// Load and validate configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self {
            http_addr: env_default("HTTP_ADDR", ":8081"),
            cache_cap: parse_cache_cap(&env_default("CACHE_CAP", "1000"))?,

            pg: PgConfig {
                host: env_trimmed("PG_HOST"),
                port: env_parse("PG_PORT", 5432),
                db: env_trimmed("PG_DB"),
                user: env_trimmed("PG_USER"),
                password: env_trimmed("PG_PASSWORD"),
                sslmode: env_default("PG_SSLMODE", "disable"),
            },

            tables: Tables {
                schema: env_trimmed("DB_SCHEMA"),
                order: env_trimmed("TBL_ORDER"),
                delivery: env_trimmed("TBL_DELIVERY"),
                payment: env_trimmed("TBL_PAYMENT"),
                item: env_trimmed("TBL_ITEM"),
            },

            kafka: KafkaConfig {
                brokers: split_csv(&env_trimmed("KAFKA_BROKERS")),
                topic: env_trimmed("KAFKA_TOPIC"),
                group: env_trimmed("KAFKA_GROUP"),
                workers: env_parse("KAFKA_WORKERS", 4usize).max(1),
            },

            breaker: BreakerConfig {
                threshold: env_parse("BREAKER_THRESHOLD", 5),
                open_timeout: env_duration("BREAKER_OPENTIMEOUT", Duration::from_secs(10)),
                max_half_open: env_parse("BREAKER_MAXHALFOPEN", 3),
            },

            retry: RetryPolicy {
                attempts: env_parse("RETRY_ATTEMPTS", 5),
                base: env_duration("RETRY_BASE", Duration::from_millis(100)),
                max: env_duration("RETRY_MAX", Duration::from_secs(5)),
                jitter_factor: env_parse("RETRY_JITTERFACTOR", 0.3f64).clamp(0.0, 1.0),
            },
        };
        cfg.validate()
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        let brokers_csv = self.kafka.brokers.join(",");
        let required: [(&str, &str); 12] = [
            ("PG_HOST", &self.pg.host),
            ("PG_DB", &self.pg.db),
            ("PG_USER", &self.pg.user),
            ("PG_PASSWORD", &self.pg.password),
            ("DB_SCHEMA", &self.tables.schema),
            ("TBL_ORDER", &self.tables.order),
            ("TBL_DELIVERY", &self.tables.delivery),
            ("TBL_PAYMENT", &self.tables.payment),
            ("TBL_ITEM", &self.tables.item),
            ("KAFKA_BROKERS", &brokers_csv),
            ("KAFKA_TOPIC", &self.kafka.topic),
            ("KAFKA_GROUP", &self.kafka.group),
        ];
        let missing: Vec<String> = required
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(key, _)| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingEnv(missing));
        }

        if self.retry.max < self.retry.base {
            tracing::warn!(
                base_ms = self.retry.base.as_millis() as u64,
                max_ms = self.retry.max.as_millis() as u64,
                "RETRY_MAX below RETRY_BASE, clamping max to base"
            );
            self.retry.max = self.retry.base;
        }
        Ok(self)
    }

    /// Bind address for the HTTP listener; a bare `:port` binds all interfaces
    pub fn listen_addr(&self) -> String {
        if self.http_addr.starts_with(':') {
            format!("0.0.0.0{}", self.http_addr)
        } else {
            self.http_addr.clone()
        }
    }
}

fn env_default(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_trimmed(key: &str) -> String {
    std::env::var(key).unwrap_or_default().trim().to_string()
}

fn env_parse<T: std::str::FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    let value = env_trimmed(key);
    if value.is_empty() {
        return default;
    }
    value.parse().unwrap_or_else(|_| {
        tracing::warn!(key, value, %default, "invalid value, using default");
        default
    })
}

fn env_duration(key: &str, default: Duration) -> Duration {
    let value = env_trimmed(key);
    if value.is_empty() {
        return default;
    }
    parse_duration(&value).unwrap_or_else(|| {
        tracing::warn!(
            key,
            value,
            default_ms = default.as_millis() as u64,
            "invalid duration, using default"
        );
        default
    })
}

fn parse_cache_cap(value: &str) -> Result<usize, ConfigError> {
    match value.parse::<i64>() {
        Ok(cap) if cap > 0 => Ok(cap as usize),
        _ => Err(ConfigError::InvalidCacheCap(value.to_string())),
    }
}

/// Accepts plain integer milliseconds (`1500`) or a units-suffixed form
/// (`250ms`, `1.5s`, `2m`, `1h`)
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.bytes().all(|b| b.is_ascii_digit()) {
        return value.parse::<u64>().ok().map(Duration::from_millis);
    }

    let (number, unit) = value.split_at(value.find(|c: char| c.is_ascii_alphabetic())?);
    let number: f64 = number.parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    let ms_per_unit = match unit {
        "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(number * ms_per_unit / 1_000.0))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
