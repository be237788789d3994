//! Launcher configuration.

use std::path::PathBuf;
use std::time::Duration;

use job_core::RetryPolicy;
use serde::Deserialize;

/// Launcher configuration loaded from environment variables.
///
/// Environment variables are prefixed with `LAUNCHER_`:
/// - `LAUNCHER_SCRATCH_ROOT`: Parent of per-launch scratch directories (default: system temp dir)
/// - `LAUNCHER_OUTPUT_ROOT`: Directory receiving `<task_id>.out` files (default: "/var/lib/jobs/output")
/// - `LAUNCHER_IDLE_TIMEOUT_SECS`: Kill a child silent for this long, 0 disables (default: 600)
/// - `LAUNCHER_POLL_TIMEOUT_MS`: Wait for output per loop iteration (default: 250)
/// - `LAUNCHER_CANCEL_GRACE_SECS`: Wait after interrupting a canceled child (default: 10)
/// - `LAUNCHER_SANDBOX_ENABLED`: Wrap children with the sandbox binary (default: false)
/// - `LAUNCHER_SANDBOX_HIDE_PATHS` / `LAUNCHER_SANDBOX_SHOW_PATHS`: comma-separated path lists
#[derive(Debug, Clone, Deserialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,

    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,

    #[serde(default = "default_status_retry_attempts")]
    pub status_retry_attempts: u32,

    #[serde(default = "default_status_retry_delay_secs")]
    pub status_retry_delay_secs: u64,

    /// Shell used for system job command lines.
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_playbook_command")]
    pub playbook_command: String,

    #[serde(default = "default_adhoc_command")]
    pub adhoc_command: String,

    #[serde(default = "default_inventory_command")]
    pub inventory_command: String,

    /// Playbook run by project syncs.
    #[serde(default = "default_project_sync_playbook")]
    pub project_sync_playbook: String,

    /// Subject the child publishes execution events on.
    #[serde(default = "default_event_subject")]
    pub event_subject: String,

    #[serde(default)]
    pub event_url: Option<String>,

    #[serde(default)]
    pub sandbox_enabled: bool,

    #[serde(default = "default_sandbox_binary")]
    pub sandbox_binary: String,

    /// Host paths replaced by empty scratch locations inside the sandbox.
    #[serde(default = "default_sandbox_hide_paths")]
    pub sandbox_hide_paths: Vec<PathBuf>,

    /// Extra host paths bound through unchanged.
    #[serde(default)]
    pub sandbox_show_paths: Vec<PathBuf>,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("/var/lib/jobs/output")
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_poll_timeout_ms() -> u64 {
    250
}

fn default_cancel_grace_secs() -> u64 {
    10
}

fn default_status_retry_attempts() -> u32 {
    5
}

fn default_status_retry_delay_secs() -> u64 {
    5
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_playbook_command() -> String {
    "ansible-playbook".to_string()
}

fn default_adhoc_command() -> String {
    "ansible".to_string()
}

fn default_inventory_command() -> String {
    "inventory-import".to_string()
}

fn default_project_sync_playbook() -> String {
    "project_update.yml".to_string()
}

fn default_event_subject() -> String {
    "jobs.events".to_string()
}

fn default_sandbox_binary() -> String {
    "bwrap".to_string()
}

fn default_sandbox_hide_paths() -> Vec<PathBuf> {
    ["/etc/jobs", "/var/lib/jobs", "/var/log", "/tmp"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

impl LauncherConfig {
    /// Load configuration from `LAUNCHER_`-prefixed environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("LAUNCHER_").from_env::<LauncherConfig>()
    }

    /// Zero disables the idle timeout.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn status_retry(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.status_retry_attempts,
            Duration::from_secs(self.status_retry_delay_secs),
        )
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            scratch_root: None,
            output_root: default_output_root(),
            idle_timeout_secs: default_idle_timeout_secs(),
            poll_timeout_ms: default_poll_timeout_ms(),
            cancel_grace_secs: default_cancel_grace_secs(),
            status_retry_attempts: default_status_retry_attempts(),
            status_retry_delay_secs: default_status_retry_delay_secs(),
            shell: default_shell(),
            playbook_command: default_playbook_command(),
            adhoc_command: default_adhoc_command(),
            inventory_command: default_inventory_command(),
            project_sync_playbook: default_project_sync_playbook(),
            event_subject: default_event_subject(),
            event_url: None,
            sandbox_enabled: false,
            sandbox_binary: default_sandbox_binary(),
            sandbox_hide_paths: default_sandbox_hide_paths(),
            sandbox_show_paths: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = LauncherConfig::default();
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.status_retry(), RetryPolicy::status_updates());
        assert!(!config.sandbox_enabled);
    }

    #[test]
    fn test_zero_idle_timeout_disables() {
        let config = LauncherConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.idle_timeout(), None);
    }

    #[test]
    fn test_path_lists_from_env() {
        let vars = vec![
            ("LAUNCHER_SANDBOX_ENABLED".to_string(), "true".to_string()),
            (
                "LAUNCHER_SANDBOX_SHOW_PATHS".to_string(),
                "/opt/collections,/srv/shared".to_string(),
            ),
        ];
        let config: LauncherConfig = envy::prefixed("LAUNCHER_").from_iter(vars).unwrap();
        assert!(config.sandbox_enabled);
        assert_eq!(
            config.sandbox_show_paths,
            vec![PathBuf::from("/opt/collections"), PathBuf::from("/srv/shared")]
        );
        assert_eq!(config.sandbox_hide_paths.len(), 4);
    }
}
