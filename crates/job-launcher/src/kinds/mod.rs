//! Per-kind launch specialization.
//!
//! A kind only decides what to run (prompt table, arguments, environment,
//! working directory, private key) and what to recompute afterwards. The
//! launch lifecycle itself is shared by every kind.

mod ad_hoc;
mod inventory_sync;
mod playbook;
mod project_sync;
mod system_job;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use job_core::{Credential, JobStore, StoreResult, TaskKind, TaskNode};

use crate::config::LauncherConfig;
use crate::error::{LaunchError, LaunchResult};
use crate::prompts::{self, PasswordTable};
use crate::scratch::ScratchSpace;

pub use ad_hoc::AdHocProfile;
pub use inventory_sync::InventorySyncProfile;
pub use playbook::PlaybookProfile;
pub use project_sync::ProjectSyncProfile;
pub use system_job::SystemJobProfile;

/// Inputs available while building a launch.
pub struct LaunchContext<'a> {
    pub task: &'a TaskNode,
    pub config: &'a LauncherConfig,
    pub scratch: &'a ScratchSpace,
}

#[async_trait]
pub trait KindProfile: Send + Sync {
    /// Reject parameters that can never launch. Must not touch the host.
    fn validate(&self, _task: &TaskNode) -> LaunchResult<()> {
        Ok(())
    }

    /// Prompt patterns and their answers.
    fn passwords(&self, task: &TaskNode) -> LaunchResult<PasswordTable> {
        credential_passwords(task.spec.credential.as_ref())
    }

    fn args(&self, ctx: &LaunchContext<'_>) -> LaunchResult<Vec<String>>;

    /// Variables added on top of the shared base environment.
    fn env(&self, ctx: &LaunchContext<'_>) -> BTreeMap<String, String> {
        ctx.task
            .spec
            .credential
            .as_ref()
            .map(|c| c.cloud_env.clone())
            .unwrap_or_default()
    }

    fn cwd(&self, ctx: &LaunchContext<'_>) -> PathBuf {
        ctx.task
            .spec
            .project_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| ctx.scratch.path().to_path_buf())
    }

    /// Private key to load into an agent for the run.
    fn private_key<'t>(&self, task: &'t TaskNode) -> Option<&'t str> {
        task.spec
            .credential
            .as_ref()
            .and_then(|c| c.ssh_key_data.as_deref())
            .filter(|k| !k.is_empty())
    }

    /// Recompute derived aggregates once the task reached a terminal status.
    async fn post_run(&self, _store: &dyn JobStore, _task: &TaskNode) -> StoreResult<()> {
        Ok(())
    }
}

static PLAYBOOK: PlaybookProfile = PlaybookProfile;
static PROJECT_SYNC: ProjectSyncProfile = ProjectSyncProfile;
static INVENTORY_SYNC: InventorySyncProfile = InventorySyncProfile;
static AD_HOC: AdHocProfile = AdHocProfile;
static SYSTEM_JOB: SystemJobProfile = SystemJobProfile;

pub fn profile_for(kind: TaskKind) -> &'static dyn KindProfile {
    match kind {
        TaskKind::PlaybookRun => &PLAYBOOK,
        TaskKind::ProjectSync => &PROJECT_SYNC,
        TaskKind::InventorySync => &INVENTORY_SYNC,
        TaskKind::AdHoc => &AD_HOC,
        TaskKind::SystemJob => &SYSTEM_JOB,
    }
}

/// Prompt table for the usual machine credential fields.
pub(crate) fn credential_passwords(credential: Option<&Credential>) -> LaunchResult<PasswordTable> {
    let mut table = PasswordTable::new();
    let Some(credential) = credential else {
        return Ok(table);
    };

    table.add(&[prompts::BAD_PASSPHRASE], "")?;
    table.add_secret("ssh_key_unlock", credential.ssh_key_unlock.as_deref(), prompts::SSH_KEY_UNLOCK)?;
    table.add_secret("become_password", credential.become_password.as_deref(), prompts::BECOME_PASSWORD)?;
    table.add_secret("vault_password", credential.vault_password.as_deref(), prompts::VAULT_PASSWORD)?;
    table.add_secret("password", credential.password.as_deref(), prompts::SSH_PASSWORD)?;
    Ok(table)
}

/// Connection and privilege-escalation flags shared by playbook and ad-hoc runs.
pub(crate) fn credential_args(task: &TaskNode) -> Vec<String> {
    let mut args = Vec::new();
    let spec = &task.spec;
    let credential = spec.credential.as_ref();

    if let Some(username) = credential.and_then(|c| c.username.as_deref()) {
        args.extend(["-u".to_string(), username.to_string()]);
    }
    if credential.is_some_and(|c| c.password.is_some()) {
        args.push("--ask-pass".to_string());
    }
    if spec.become_enabled {
        args.push("--become".to_string());
        if let Some(method) = credential.and_then(|c| c.become_method.as_deref()) {
            args.extend(["--become-method".to_string(), method.to_string()]);
        }
        if let Some(user) = credential.and_then(|c| c.become_username.as_deref()) {
            args.extend(["--become-user".to_string(), user.to_string()]);
        }
    }
    if credential.is_some_and(|c| c.become_password.is_some()) {
        args.push("--ask-become-pass".to_string());
    }
    if credential.is_some_and(|c| c.vault_password.is_some()) {
        args.push("--ask-vault-pass".to_string());
    }
    args
}

/// Forks, verbosity and the extra variables file.
pub(crate) fn run_args(ctx: &LaunchContext<'_>) -> LaunchResult<Vec<String>> {
    let spec = &ctx.task.spec;
    let mut args = Vec::new();

    if spec.forks > 0 {
        args.extend(["-f".to_string(), spec.forks.to_string()]);
    }
    if spec.verbosity > 0 {
        args.push(format!("-{}", "v".repeat(usize::from(spec.verbosity.min(5)))));
    }
    if let Some(extra_vars) = &spec.extra_vars {
        args.extend(["-e".to_string(), extra_vars_file(ctx, extra_vars)?]);
    }
    Ok(args)
}

/// Write variables to a private scratch file and return the `@path` reference.
pub(crate) fn extra_vars_file(ctx: &LaunchContext<'_>, vars: &serde_json::Value) -> LaunchResult<String> {
    let contents = serde_json::to_vec(vars)
        .map_err(|e| LaunchError::Invalid(format!("extra vars: {}", e)))?;
    let path = ctx
        .scratch
        .write_private("extra_vars.json", &contents)
        .map_err(LaunchError::Scratch)?;
    Ok(format!("@{}", path.display()))
}

pub(crate) fn require<'t>(value: Option<&'t str>, field: &str) -> LaunchResult<&'t str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| LaunchError::Invalid(format!("{} is required", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use job_core::model::ASK;
    use job_core::{NewTask, TaskSpec};

    pub(super) fn task(kind: TaskKind, spec: TaskSpec) -> TaskNode {
        NewTask::new(kind, "test").with_spec(spec).into_node(42, Utc::now())
    }

    #[test]
    fn test_profile_table_covers_every_kind() {
        for kind in TaskKind::ALL {
            let _ = profile_for(kind);
        }
    }

    #[test]
    fn test_credential_args() {
        let spec = TaskSpec {
            become_enabled: true,
            credential: Some(Credential {
                username: Some("deploy".to_string()),
                password: Some("pw".to_string()),
                become_method: Some("sudo".to_string()),
                become_password: Some("pw".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let args = credential_args(&task(TaskKind::PlaybookRun, spec));
        assert_eq!(
            args,
            vec!["-u", "deploy", "--ask-pass", "--become", "--become-method", "sudo", "--ask-become-pass"]
        );
    }

    #[test]
    fn test_deferred_password_aborts() {
        let credential = Credential {
            vault_password: Some(ASK.to_string()),
            ..Default::default()
        };
        let err = credential_passwords(Some(&credential)).unwrap_err();
        assert!(matches!(err, LaunchError::NeedsInput(field) if field == "vault_password"));
    }

    #[test]
    fn test_extra_vars_go_to_private_file() {
        let spec = TaskSpec {
            extra_vars: Some(serde_json::json!({"db_password": "s3cret"})),
            verbosity: 2,
            ..Default::default()
        };
        let task = task(TaskKind::PlaybookRun, spec);
        let scratch = ScratchSpace::new(None, "kinds-test-").unwrap();
        let config = LauncherConfig::default();
        let ctx = LaunchContext { task: &task, config: &config, scratch: &scratch };

        let args = run_args(&ctx).unwrap();
        assert_eq!(args[0], "-vv");
        assert_eq!(args[1], "-e");
        assert!(args[2].starts_with('@'));
        assert!(!args.iter().any(|a| a.contains("s3cret")));

        let written = std::fs::read_to_string(&args[2][1..]).unwrap();
        assert!(written.contains("s3cret"));
    }
}
