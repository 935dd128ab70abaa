//! Configuration module for course-service.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use service_core::config as core_config;
use service_core::error::AppError;

use crate::services::RetryConfig;

#[derive(Debug, Clone)]
pub struct CourseConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub transactions: RetryConfig,
    pub event_buffer_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Postgres(DatabaseConfig),
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

fn parsed_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl CourseConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(
        common: core_config::Config,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AppError> {
        let backend = lookup("STORE_BACKEND").unwrap_or_else(|| "postgres".to_string());
        let store = match backend.trim().to_ascii_lowercase().as_str() {
            "postgres" => StoreConfig::Postgres(DatabaseConfig {
                url: lookup("DATABASE_URL").ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "DATABASE_URL is required for the postgres store"
                    ))
                })?,
                max_connections: parsed_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parsed_or(&lookup, "DATABASE_MIN_CONNECTIONS", 2),
            }),
            "memory" => StoreConfig::Memory,
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "unknown STORE_BACKEND '{}', expected postgres or memory",
                    other
                )))
            }
        };

        let transactions = RetryConfig {
            max_retries: parsed_or(&lookup, "TRANSACTION_MAX_RETRIES", 5),
            initial_backoff: Duration::from_millis(parsed_or(
                &lookup,
                "TRANSACTION_INITIAL_BACKOFF_MS",
                25,
            )),
            max_backoff: Duration::from_millis(parsed_or(
                &lookup,
                "TRANSACTION_MAX_BACKOFF_MS",
                1000,
            )),
            ..RetryConfig::default()
        };

        Ok(Self {
            common,
            service_name: lookup("SERVICE_NAME").unwrap_or_else(|| "course-service".to_string()),
            service_version: lookup("SERVICE_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            otlp_endpoint: lookup("OTLP_ENDPOINT").filter(|s| !s.trim().is_empty()),
            store,
            transactions,
            event_buffer_size: parsed_or(&lookup, "EVENT_BUFFER_SIZE", 256),
        })
    }
}
