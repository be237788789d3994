//! Scheduler daemon configuration.

use std::time::Duration;

use serde::Deserialize;

/// Scheduler configuration loaded from environment variables.
///
/// Environment variables are prefixed with `SCHEDULER_`:
/// - `SCHEDULER_CAPACITY`: Total task impact admitted concurrently (default: 200)
/// - `SCHEDULER_REBUILD_INTERVAL_SECS`: Forced rebuild interval (default: 60)
/// - `SCHEDULER_POLL_INTERVAL_MS`: Control channel poll cadence (default: 100)
/// - `SCHEDULER_NATS_URL`: NATS server; control and notifications are local-only when unset
/// - `SCHEDULER_CONTROL_SUBJECT`: Control request subject (default: "jobs.scheduler.control")
/// - `SCHEDULER_STATUS_SUBJECT`: Status notification subject (default: "jobs.status")
/// - `SCHEDULER_START_PAUSED`: Start with admission paused (default: false)
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    #[serde(default = "default_rebuild_interval_secs")]
    pub rebuild_interval_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub nats_url: Option<String>,

    #[serde(default = "default_control_subject")]
    pub control_subject: String,

    #[serde(default = "default_status_subject")]
    pub status_subject: String,

    #[serde(default)]
    pub start_paused: bool,
}

fn default_capacity() -> u32 {
    200
}

fn default_rebuild_interval_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_control_subject() -> String {
    "jobs.scheduler.control".to_string()
}

fn default_status_subject() -> String {
    job_core::notify::DEFAULT_STATUS_SUBJECT.to_string()
}

impl SchedulerConfig {
    /// Load configuration from `SCHEDULER_`-prefixed environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("SCHEDULER_").from_env::<SchedulerConfig>()
    }

    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_secs(self.rebuild_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            rebuild_interval_secs: default_rebuild_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            nats_url: None,
            control_subject: default_control_subject(),
            status_subject: default_status_subject(),
            start_paused: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.capacity, 200);
        assert_eq!(config.rebuild_interval(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert!(config.nats_url.is_none());
    }

    #[test]
    fn test_from_prefixed_vars() {
        let vars = vec![
            ("SCHEDULER_CAPACITY".to_string(), "50".to_string()),
            ("SCHEDULER_NATS_URL".to_string(), "nats://nats:4222".to_string()),
        ];
        let config: SchedulerConfig = envy::prefixed("SCHEDULER_").from_iter(vars).unwrap();
        assert_eq!(config.capacity, 50);
        assert_eq!(config.nats_url.as_deref(), Some("nats://nats:4222"));
        assert_eq!(config.control_subject, "jobs.scheduler.control");
    }
}
