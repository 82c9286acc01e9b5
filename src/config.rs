//! Application configuration loaded from environment variables.

use crate::errors::{PledgeError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) the reconciliation sweep runs
    pub sweep_interval_secs: u64,
    /// Bounded attempts for the optimistic aggregate increment
    pub aggregate_retry_attempts: u32,
    /// Base backoff (milliseconds) between aggregate conflict retries
    pub aggregate_backoff_ms: u64,
    /// Receipt webhook endpoint; receipts are logged only when unset
    pub receipt_webhook_url: Option<String>,
    /// Delayed retries for a failed receipt delivery
    pub receipt_retry_attempts: u32,
    /// Delay (in seconds) between receipt delivery retries
    pub receipt_retry_delay_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./pledger.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| PledgeError::Config("Invalid API_PORT".to_string()))?,
            sweep_interval_secs: env_var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| PledgeError::Config("Invalid SWEEP_INTERVAL_SECS".to_string()))?,
            aggregate_retry_attempts: env_var("AGGREGATE_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| PledgeError::Config("Invalid AGGREGATE_RETRY_ATTEMPTS".to_string()))?,
            aggregate_backoff_ms: env_var("AGGREGATE_BACKOFF_MS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| PledgeError::Config("Invalid AGGREGATE_BACKOFF_MS".to_string()))?,
            receipt_webhook_url: env_var("RECEIPT_WEBHOOK_URL").ok(),
            receipt_retry_attempts: env_var("RECEIPT_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| PledgeError::Config("Invalid RECEIPT_RETRY_ATTEMPTS".to_string()))?,
            receipt_retry_delay_secs: env_var("RECEIPT_RETRY_DELAY_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| {
                    PledgeError::Config("Invalid RECEIPT_RETRY_DELAY_SECS".to_string())
                })?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| PledgeError::Config(format!("Missing env var: {key}")))
}
