//! Launch parameters carried by a task.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::target::TargetRef;
use super::task::TaskKind;

/// Sentinel value for a secret that must be supplied at launch time.
pub const ASK: &str = "ASK";

/// Kind-specific launch parameters.
///
/// Only the fields relevant to the task's kind are read by the launcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    pub template_id: Option<i64>,
    pub project_id: Option<i64>,
    pub inventory_id: Option<i64>,
    pub inventory_source_id: Option<i64>,

    /// Playbook path relative to the project directory.
    pub playbook: Option<String>,
    /// Local checkout of the project.
    pub project_path: Option<String>,
    /// Inventory file or script handed to the runner.
    pub inventory_path: Option<String>,

    pub module_name: Option<String>,
    pub module_args: Option<String>,
    pub limit: Option<String>,
    pub job_tags: Option<String>,
    pub extra_vars: Option<serde_json::Value>,
    pub verbosity: u8,
    pub forks: u32,
    pub become_enabled: bool,

    pub scm_type: Option<String>,
    pub scm_url: Option<String>,
    pub scm_branch: Option<String>,
    pub scm_clean: bool,

    /// Inventory source type (e.g. `ec2`, `file`).
    pub source: Option<String>,
    pub source_path: Option<String>,
    pub overwrite: bool,

    /// Maintenance command run by a system job.
    pub system_command: Option<String>,
    pub retention_days: Option<u32>,

    pub credential: Option<Credential>,

    /// Entities that may force a prerequisite sync before this task runs.
    pub dependencies: Vec<Dependency>,

    /// Allow concurrent runs of the same template.
    pub allow_simultaneous: bool,
}

/// A reference that may force a prerequisite task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// Kind of prerequisite to create (a sync kind).
    pub kind: TaskKind,
    /// Id of the project or inventory source to refresh.
    pub target_id: i64,
    #[serde(default)]
    pub task_impact: u32,
    /// Launch parameters for the prerequisite.
    #[serde(default)]
    pub spec: TaskSpec,
    /// A sync newer than this is reused instead of creating a prerequisite.
    #[serde(default)]
    pub cache_timeout_secs: u64,
}

impl Dependency {
    pub fn new(kind: TaskKind, target_id: i64) -> Self {
        Self {
            kind,
            target_id,
            task_impact: 0,
            spec: TaskSpec::default(),
            cache_timeout_secs: 0,
        }
    }

    pub fn target(&self) -> TargetRef {
        match self.kind {
            TaskKind::InventorySync => TargetRef::InventorySource(self.target_id),
            TaskKind::ProjectSync => TargetRef::Project(self.target_id),
            _ => TargetRef::Template(self.target_id),
        }
    }

    /// Launch parameters of the prerequisite, pointing at the target.
    pub fn prerequisite_spec(&self) -> TaskSpec {
        let mut spec = self.spec.clone();
        match self.kind {
            TaskKind::ProjectSync => spec.project_id = Some(self.target_id),
            TaskKind::InventorySync => spec.inventory_source_id = Some(self.target_id),
            _ => spec.template_id = Some(self.target_id),
        }
        spec
    }
}

/// Credential fields used to answer prompts and build the environment.
///
/// Any secret may hold [`ASK`], meaning it must be supplied at launch time.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credential {
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssh_key_data: Option<String>,
    pub ssh_key_unlock: Option<String>,
    pub become_method: Option<String>,
    pub become_username: Option<String>,
    pub become_password: Option<String>,
    pub vault_password: Option<String>,
    /// Cloud provider variables exported to the child environment.
    pub cloud_env: BTreeMap<String, String>,
}

impl Credential {
    /// Names of the secret fields deferred to launch time.
    pub fn deferred_fields(&self) -> Vec<&'static str> {
        [
            ("password", &self.password),
            ("ssh_key_unlock", &self.ssh_key_unlock),
            ("become_password", &self.become_password),
            ("vault_password", &self.vault_password),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref() == Some(ASK))
        .map(|(name, _)| name)
        .collect()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(value: &Option<String>) -> Option<&'static str> {
            value.as_ref().map(|_| "********")
        }

        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("ssh_key_data", &mask(&self.ssh_key_data))
            .field("ssh_key_unlock", &mask(&self.ssh_key_unlock))
            .field("become_method", &self.become_method)
            .field("become_username", &self.become_username)
            .field("become_password", &mask(&self.become_password))
            .field("vault_password", &mask(&self.vault_password))
            .field("cloud_env", &self.cloud_env.keys().collect::<Vec<_>>())
            .finish()
    }
}
