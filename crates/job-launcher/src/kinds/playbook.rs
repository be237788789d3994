use async_trait::async_trait;
use job_core::{JobStore, StoreResult, TargetRef, TaskNode};

use super::{credential_args, require, run_args, KindProfile, LaunchContext};
use crate::error::{LaunchError, LaunchResult};

/// `ansible-playbook` against the task's inventory.
pub struct PlaybookProfile;

#[async_trait]
impl KindProfile for PlaybookProfile {
    fn validate(&self, task: &TaskNode) -> LaunchResult<()> {
        let playbook = require(task.spec.playbook.as_deref(), "playbook")?;
        require(task.spec.inventory_path.as_deref(), "inventory_path")?;
        if playbook.starts_with('-') {
            return Err(LaunchError::Invalid(format!("bad playbook name: {}", playbook)));
        }
        Ok(())
    }

    fn args(&self, ctx: &LaunchContext<'_>) -> LaunchResult<Vec<String>> {
        let spec = &ctx.task.spec;
        let playbook = require(spec.playbook.as_deref(), "playbook")?;
        let inventory = require(spec.inventory_path.as_deref(), "inventory_path")?;

        let mut args = vec![
            ctx.config.playbook_command.clone(),
            "-i".to_string(),
            inventory.to_string(),
        ];
        args.extend(credential_args(ctx.task));
        if let Some(limit) = spec.limit.as_deref().filter(|l| !l.is_empty()) {
            args.extend(["-l".to_string(), limit.to_string()]);
        }
        if let Some(tags) = spec.job_tags.as_deref().filter(|t| !t.is_empty()) {
            args.extend(["-t".to_string(), tags.to_string()]);
        }
        args.extend(run_args(ctx)?);
        args.push(playbook.to_string());
        Ok(args)
    }

    async fn post_run(&self, store: &dyn JobStore, task: &TaskNode) -> StoreResult<()> {
        let Some(finished) = task.finished else {
            return Ok(());
        };
        if let Some(template_id) = task.spec.template_id {
            store
                .record_target_run(TargetRef::Template(template_id), task.status, finished)
                .await?;
        }
        Ok(())
    }
}
