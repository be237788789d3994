use async_trait::async_trait;
use job_core::TaskNode;

use super::{credential_args, require, run_args, KindProfile, LaunchContext};
use crate::error::LaunchResult;

/// A single module run against a host pattern.
pub struct AdHocProfile;

#[async_trait]
impl KindProfile for AdHocProfile {
    fn validate(&self, task: &TaskNode) -> LaunchResult<()> {
        require(task.spec.module_name.as_deref(), "module_name")?;
        require(task.spec.inventory_path.as_deref(), "inventory_path")?;
        Ok(())
    }

    fn args(&self, ctx: &LaunchContext<'_>) -> LaunchResult<Vec<String>> {
        let spec = &ctx.task.spec;
        let module = require(spec.module_name.as_deref(), "module_name")?;
        let inventory = require(spec.inventory_path.as_deref(), "inventory_path")?;

        let mut args = vec![
            ctx.config.adhoc_command.clone(),
            "-i".to_string(),
            inventory.to_string(),
        ];
        args.extend(credential_args(ctx.task));
        args.extend(["-m".to_string(), module.to_string()]);
        if let Some(module_args) = spec.module_args.as_deref().filter(|a| !a.is_empty()) {
            args.extend(["-a".to_string(), module_args.to_string()]);
        }
        args.extend(run_args(ctx)?);
        args.push(
            spec.limit
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "all".to_string()),
        );
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LauncherConfig;
    use crate::kinds::tests::task;
    use crate::scratch::ScratchSpace;
    use job_core::{TaskKind, TaskSpec};

    #[test]
    fn test_args_default_to_all_hosts() {
        let spec = TaskSpec {
            module_name: Some("ping".to_string()),
            inventory_path: Some("/srv/inventory/hosts".to_string()),
            ..Default::default()
        };
        let task = task(TaskKind::AdHoc, spec);
        let scratch = ScratchSpace::new(None, "adhoc-test-").unwrap();
        let config = LauncherConfig::default();
        let ctx = LaunchContext { task: &task, config: &config, scratch: &scratch };

        assert_eq!(
            AdHocProfile.args(&ctx).unwrap(),
            vec!["ansible", "-i", "/srv/inventory/hosts", "-m", "ping", "all"]
        );
    }

    #[test]
    fn test_validate_requires_module() {
        let task = task(TaskKind::AdHoc, TaskSpec::default());
        assert!(AdHocProfile.validate(&task).is_err());
    }
}
