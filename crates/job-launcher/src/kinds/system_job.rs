use std::path::PathBuf;

use async_trait::async_trait;
use job_core::TaskNode;

use super::{require, KindProfile, LaunchContext};
use crate::error::LaunchResult;
use crate::prompts::PasswordTable;

/// Maintenance command line run through the configured shell.
pub struct SystemJobProfile;

#[async_trait]
impl KindProfile for SystemJobProfile {
    fn validate(&self, task: &TaskNode) -> LaunchResult<()> {
        require(task.spec.system_command.as_deref(), "system_command")?;
        Ok(())
    }

    fn passwords(&self, _task: &TaskNode) -> LaunchResult<PasswordTable> {
        Ok(PasswordTable::new())
    }

    fn args(&self, ctx: &LaunchContext<'_>) -> LaunchResult<Vec<String>> {
        let spec = &ctx.task.spec;
        let mut command = require(spec.system_command.as_deref(), "system_command")?.to_string();
        if let Some(days) = spec.retention_days {
            command.push_str(&format!(" --days {}", days));
        }
        Ok(vec![ctx.config.shell.clone(), "-c".to_string(), command])
    }

    fn cwd(&self, ctx: &LaunchContext<'_>) -> PathBuf {
        ctx.scratch.path().to_path_buf()
    }

    fn private_key<'t>(&self, _task: &'t TaskNode) -> Option<&'t str> {
        None
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
    fn test_retention_days_appended() {
        let spec = TaskSpec {
            system_command: Some("job-maintenance cleanup".to_string()),
            retention_days: Some(30),
            ..Default::default()
        };
        let task = task(TaskKind::SystemJob, spec);
        let scratch = ScratchSpace::new(None, "system-test-").unwrap();
        let config = LauncherConfig::default();
        let ctx = LaunchContext { task: &task, config: &config, scratch: &scratch };

        assert_eq!(
            SystemJobProfile.args(&ctx).unwrap(),
            vec!["/bin/sh", "-c", "job-maintenance cleanup --days 30"]
        );
    }
}
