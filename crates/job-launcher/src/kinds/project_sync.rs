use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use job_core::{JobStore, StoreResult, TargetRef, TaskNode};
use serde_json::json;

use super::{extra_vars_file, require, KindProfile, LaunchContext};
use crate::error::{LaunchError, LaunchResult};
use crate::prompts::{self, PasswordTable};

/// Refreshes a project checkout by running the sync playbook locally.
pub struct ProjectSyncProfile;

#[async_trait]
impl KindProfile for ProjectSyncProfile {
    fn validate(&self, task: &TaskNode) -> LaunchResult<()> {
        if task.spec.project_id.is_none() {
            return Err(LaunchError::Invalid("project_id is required".to_string()));
        }
        require(task.spec.scm_url.as_deref(), "scm_url")?;
        require(task.spec.project_path.as_deref(), "project_path")?;
        Ok(())
    }

    fn passwords(&self, task: &TaskNode) -> LaunchResult<PasswordTable> {
        let mut table = PasswordTable::new();
        let Some(credential) = task.spec.credential.as_ref() else {
            return Ok(table);
        };
        table.add(&[prompts::BAD_PASSPHRASE], "")?;
        table.add_secret("ssh_key_unlock", credential.ssh_key_unlock.as_deref(), prompts::SSH_KEY_UNLOCK)?;
        if let Some(username) = credential.username.as_deref() {
            table.add(prompts::SCM_USERNAME, username)?;
        }
        table.add_secret("password", credential.password.as_deref(), prompts::SCM_PASSWORD)?;
        Ok(table)
    }

    fn args(&self, ctx: &LaunchContext<'_>) -> LaunchResult<Vec<String>> {
        let spec = &ctx.task.spec;
        let vars = json!({
            "project_path": require(spec.project_path.as_deref(), "project_path")?,
            "scm_url": require(spec.scm_url.as_deref(), "scm_url")?,
            "scm_type": spec.scm_type.as_deref().unwrap_or("git"),
            "scm_branch": spec.scm_branch.as_deref().unwrap_or(""),
            "scm_clean": spec.scm_clean,
        });

        Ok(vec![
            ctx.config.playbook_command.clone(),
            "-i".to_string(),
            "localhost,".to_string(),
            "-c".to_string(),
            "local".to_string(),
            "-e".to_string(),
            extra_vars_file(ctx, &vars)?,
            ctx.config.project_sync_playbook.clone(),
        ])
    }

    fn env(&self, _ctx: &LaunchContext<'_>) -> BTreeMap<String, String> {
        // Never let git fall back to asking on a terminal we do not answer.
        BTreeMap::from([("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())])
    }

    fn cwd(&self, ctx: &LaunchContext<'_>) -> PathBuf {
        ctx.scratch.path().to_path_buf()
    }

    async fn post_run(&self, store: &dyn JobStore, task: &TaskNode) -> StoreResult<()> {
        if let (Some(project_id), Some(finished)) = (task.spec.project_id, task.finished) {
            store
                .record_target_run(TargetRef::Project(project_id), task.status, finished)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LauncherConfig;
    use crate::kinds::tests::task;
    use crate::scratch::ScratchSpace;
    use job_core::{Credential, MemoryJobStore, TaskKind, TaskSpec, TaskStatus};

    fn spec() -> TaskSpec {
        TaskSpec {
            project_id: Some(7),
            scm_url: Some("https://git.example.com/playbooks.git".to_string()),
            project_path: Some("/srv/projects/7".to_string()),
            credential: Some(Credential {
                username: Some("deploy".to_string()),
                password: Some("t0ken".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_scm_prompts() {
        let task = task(TaskKind::ProjectSync, spec());
        let table = ProjectSyncProfile.passwords(&task).unwrap();
        assert_eq!(table.answer_for("Username for 'https://git.example.com': "), Some("deploy"));
        assert_eq!(table.answer_for("Password for 'https://deploy@git.example.com': "), Some("t0ken"));
    }

    #[test]
    fn test_sync_vars_are_not_in_args() {
        let task = task(TaskKind::ProjectSync, spec());
        let scratch = ScratchSpace::new(None, "sync-test-").unwrap();
        let config = LauncherConfig::default();
        let ctx = LaunchContext { task: &task, config: &config, scratch: &scratch };

        let args = ProjectSyncProfile.args(&ctx).unwrap();
        assert_eq!(args.last().unwrap(), "project_update.yml");
        assert!(!args.iter().any(|a| a.contains("git.example.com")));
        assert_eq!(ProjectSyncProfile.cwd(&ctx), scratch.path());
    }

    #[tokio::test]
    async fn test_post_run_records_project() {
        let store = MemoryJobStore::new();
        let mut task = task(TaskKind::ProjectSync, spec());
        task.status = TaskStatus::Successful;
        task.finished = Some(chrono::Utc::now());

        ProjectSyncProfile.post_run(&store, &task).await.unwrap();
        let state = store.target_state(TargetRef::Project(7)).await.unwrap().unwrap();
        assert_eq!(state.last_status, Some(TaskStatus::Successful));
    }
}
