//! Event pipeline configuration.

use std::time::Duration;

use job_core::RetryPolicy;
use serde::Deserialize;

/// Ingestion configuration loaded from environment variables.
///
/// Environment variables are prefixed with `INGEST_`:
/// - `INGEST_WORKERS`: Number of persistence workers (default: 4)
/// - `INGEST_QUEUE_SIZE`: Bounded queue length per worker (default: 256)
/// - `INGEST_MAX_MESSAGES`: Messages a worker handles before it is replaced (default: 10000)
/// - `INGEST_RETRY_ATTEMPTS` / `INGEST_RETRY_DELAY_MS`: Write retry policy (default: 10, 1000)
/// - `INGEST_NATS_URL`: NATS server (default: "nats://localhost:4222")
/// - `INGEST_SUBJECT`: Intake subject (default: "jobs.events")
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Zero disables recycling.
    #[serde(default = "default_max_messages")]
    pub max_messages: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    #[serde(default = "default_subject")]
    pub subject: String,

    /// Buffer between the intake subscriber and the front end.
    #[serde(default = "default_intake_buffer")]
    pub intake_buffer: usize,
}

fn default_workers() -> usize {
    4
}

fn default_queue_size() -> usize {
    256
}

fn default_max_messages() -> u64 {
    10_000
}

fn default_retry_attempts() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_subject() -> String {
    "jobs.events".to_string()
}

fn default_intake_buffer() -> usize {
    1024
}

impl IngestConfig {
    /// Load configuration from `INGEST_`-prefixed environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("INGEST_").from_env::<IngestConfig>()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_size: default_queue_size(),
            max_messages: default_max_messages(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            nats_url: default_nats_url(),
            subject: default_subject(),
            intake_buffer: default_intake_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_matches_event_writes() {
        assert_eq!(IngestConfig::default().retry_policy(), RetryPolicy::event_writes());
    }

    #[test]
    fn test_config_from_env() {
        let vars = vec![
            ("INGEST_WORKERS".to_string(), "8".to_string()),
            ("INGEST_MAX_MESSAGES".to_string(), "0".to_string()),
        ];
        let config: IngestConfig = envy::prefixed("INGEST_").from_iter(vars).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.max_messages, 0);
        assert_eq!(config.subject, "jobs.events");
    }
}
