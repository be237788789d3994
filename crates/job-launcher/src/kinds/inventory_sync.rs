use std::path::PathBuf;

use async_trait::async_trait;
use job_core::{JobStore, StoreResult, TargetRef, TaskNode};

use super::{KindProfile, LaunchContext};
use crate::error::{LaunchError, LaunchResult};

/// Imports hosts and groups from an external inventory source.
pub struct InventorySyncProfile;

#[async_trait]
impl KindProfile for InventorySyncProfile {
    fn validate(&self, task: &TaskNode) -> LaunchResult<()> {
        let spec = &task.spec;
        if spec.inventory_source_id.is_none() || spec.inventory_id.is_none() {
            return Err(LaunchError::Invalid(
                "inventory_source_id and inventory_id are required".to_string(),
            ));
        }
        if spec.source_path.is_none() && spec.source.is_none() {
            return Err(LaunchError::Invalid("source or source_path is required".to_string()));
        }
        Ok(())
    }

    fn args(&self, ctx: &LaunchContext<'_>) -> LaunchResult<Vec<String>> {
        self.validate(ctx.task)?;
        let spec = &ctx.task.spec;
        let source = spec
            .source_path
            .as_deref()
            .or(spec.source.as_deref())
            .unwrap_or_default();

        let mut args = vec![
            ctx.config.inventory_command.clone(),
            "--source".to_string(),
            source.to_string(),
        ];
        if let Some(inventory_id) = spec.inventory_id {
            args.extend(["--inventory-id".to_string(), inventory_id.to_string()]);
        }
        if spec.overwrite {
            args.push("--overwrite".to_string());
        }
        if spec.verbosity > 0 {
            args.extend(["-v".to_string(), spec.verbosity.to_string()]);
        }
        Ok(args)
    }

    fn cwd(&self, ctx: &LaunchContext<'_>) -> PathBuf {
        ctx.scratch.path().to_path_buf()
    }

    async fn post_run(&self, store: &dyn JobStore, task: &TaskNode) -> StoreResult<()> {
        let Some(finished) = task.finished else {
            return Ok(());
        };
        if let Some(source_id) = task.spec.inventory_source_id {
            store
                .record_target_run(TargetRef::InventorySource(source_id), task.status, finished)
                .await?;
        }
        if let Some(inventory_id) = task.spec.inventory_id {
            store
                .record_target_run(TargetRef::Inventory(inventory_id), task.status, finished)
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
    use job_core::{MemoryJobStore, TaskKind, TaskSpec, TaskStatus};

    fn spec() -> TaskSpec {
        TaskSpec {
            inventory_id: Some(2),
            inventory_source_id: Some(9),
            source: Some("ec2".to_string()),
            overwrite: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_args() {
        let task = task(TaskKind::InventorySync, spec());
        let scratch = ScratchSpace::new(None, "inv-test-").unwrap();
        let config = LauncherConfig::default();
        let ctx = LaunchContext { task: &task, config: &config, scratch: &scratch };

        assert_eq!(
            InventorySyncProfile.args(&ctx).unwrap(),
            vec!["inventory-import", "--source", "ec2", "--inventory-id", "2", "--overwrite"]
        );
    }

    #[test]
    fn test_validate_requires_source() {
        let task = task(TaskKind::InventorySync, TaskSpec { source: None, ..spec() });
        assert!(InventorySyncProfile.validate(&task).is_err());
    }

    #[tokio::test]
    async fn test_post_run_records_source_and_inventory() {
        let store = MemoryJobStore::new();
        let mut task = task(TaskKind::InventorySync, spec());
        task.status = TaskStatus::Successful;
        task.finished = Some(chrono::Utc::now());

        InventorySyncProfile.post_run(&store, &task).await.unwrap();
        assert!(store.target_state(TargetRef::InventorySource(9)).await.unwrap().is_some());
        assert!(store.target_state(TargetRef::Inventory(2)).await.unwrap().is_some());
    }
}
