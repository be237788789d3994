//! Generic launch lifecycle shared by every task kind.
//!
//! [`Launcher::begin`] moves the task to `running` with its execution handle.
//! [`Launcher::supervise`] then prepares scratch space, secrets, arguments
//! and environment, runs the child on a pseudo-terminal, answers prompts,
//! polls the cancel flag, enforces the idle timeout and records the terminal
//! status. Every failure inside a launch ends as a terminal status on the task
//! instead of propagating; cancellation wins over any other outcome.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use job_core::retry::update_with_retry;
use job_core::{JobStore, Notifier, StatusChange, StoreResult, TaskNode, TaskStatus, TaskUpdate};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use crate::config::LauncherConfig;
use crate::error::{LaunchError, LaunchResult};
use crate::keyagent::wrap_with_key_agent;
use crate::kinds::{profile_for, LaunchContext};
use crate::prompts::PasswordTable;
use crate::pty::{Output, PtyProcess};
use crate::redact::{mask_secrets, redact_args, redact_env};
use crate::sandbox::SandboxWrapper;
use crate::scratch::ScratchSpace;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const MAX_EXPLANATION: usize = 1024;
/// Prompt patterns are anchored at the end of the line, so only the tail of
/// an unterminated line needs scanning.
const PROMPT_WINDOW: usize = 256;

/// How the child's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Exited(u32),
    Canceled,
    IdleTimeout,
}

/// Terminal fields recorded for a finished launch.
#[derive(Debug, Clone)]
struct RunOutcome {
    status: TaskStatus,
    explanation: String,
    output_location: Option<String>,
    error_trace: String,
    args_used: Vec<String>,
    cwd_used: Option<String>,
    env_used: BTreeMap<String, String>,
}

impl RunOutcome {
    fn from_error(err: &LaunchError) -> Self {
        let status = if err.is_task_error() {
            TaskStatus::Failed
        } else {
            TaskStatus::Error
        };
        let mut explanation = err.to_string();
        truncate_chars(&mut explanation, MAX_EXPLANATION);
        Self {
            status,
            explanation,
            output_location: None,
            error_trace: format!("{:?}", err),
            args_used: Vec::new(),
            cwd_used: None,
            env_used: BTreeMap::new(),
        }
    }

    fn into_update(self) -> TaskUpdate {
        TaskUpdate {
            result_output_location: self.output_location,
            result_error_trace: Some(self.error_trace),
            args_used: Some(self.args_used).filter(|a| !a.is_empty()),
            cwd_used: self.cwd_used,
            env_used: Some(self.env_used).filter(|e| !e.is_empty()),
            ..TaskUpdate::finished(self.status, self.explanation)
        }
    }
}

/// Everything needed to spawn the child, built fresh for each launch.
struct Prepared {
    args: Vec<String>,
    args_used: Vec<String>,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    env_used: BTreeMap<String, String>,
    passwords: PasswordTable,
}

pub struct Launcher {
    config: Arc<LauncherConfig>,
    store: Arc<dyn JobStore>,
    notifier: Arc<dyn Notifier>,
}

impl Launcher {
    pub fn new(config: LauncherConfig, store: Arc<dyn JobStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            notifier,
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Check a task can launch without creating anything on the host.
    pub fn check(&self, task: &TaskNode) -> LaunchResult<()> {
        let profile = profile_for(task.kind);
        profile.validate(task)?;
        profile.passwords(task)?;
        Ok(())
    }

    /// Move the task to `running` and record its execution handle.
    pub async fn begin(&self, task: &TaskNode, handle: &str) -> StoreResult<TaskNode> {
        let update = TaskUpdate {
            execution_handle: Some(handle.to_string()),
            started: Some(Utc::now()),
            ..TaskUpdate::status(TaskStatus::Running)
        };
        let running = update_with_retry(self.store.as_ref(), task.id, update, self.config.status_retry()).await?;
        self.notifier.notify(StatusChange::for_task(&running)).await;
        Ok(running)
    }

    /// Run the task to completion and record its terminal status.
    ///
    /// Returns the final record, or the best local view of it when the final
    /// write could not be persisted.
    pub async fn supervise(&self, task: TaskNode) -> TaskNode {
        let mut outcome = match self.run(&task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(task_id = task.id, error = %e, "Launch failed");
                RunOutcome::from_error(&e)
            }
        };

        if outcome.status != TaskStatus::Canceled && self.cancel_requested(task.id).await {
            outcome.status = TaskStatus::Canceled;
            outcome.explanation = "Job was canceled".to_string();
        }

        let status = outcome.status;
        let update = outcome.into_update();
        let finished = match update_with_retry(
            self.store.as_ref(),
            task.id,
            update.clone(),
            self.config.status_retry(),
        )
        .await
        {
            Ok(finished) => finished,
            Err(e) => {
                tracing::error!(
                    task_id = task.id,
                    status = %status,
                    error = %e,
                    "Unrecoverable: terminal status could not be saved"
                );
                let mut local = task.clone();
                let _ = update.apply_to(&mut local);
                local
            }
        };

        if let Err(e) = profile_for(finished.kind).post_run(self.store.as_ref(), &finished).await {
            tracing::warn!(task_id = finished.id, error = %e, "Post-run hook failed");
        }

        tracing::info!(
            task_id = finished.id,
            kind = %finished.kind,
            status = %finished.status,
            "Task finished"
        );
        self.notifier
            .notify(StatusChange::for_task(&finished).with("explanation", finished.job_explanation.as_str()))
            .await;
        finished
    }

    async fn run(&self, task: &TaskNode) -> LaunchResult<RunOutcome> {
        let scratch = ScratchSpace::new(self.config.scratch_root.as_deref(), &format!("{}-", task.log_name()))
            .map_err(LaunchError::Scratch)?;
        let prepared = self.prepare(task, &scratch)?;

        tokio::fs::create_dir_all(&self.config.output_root).await?;
        let output_path = self.config.output_root.join(format!("{}.out", task.id));
        let mut output = tokio::fs::File::create(&output_path).await?;

        let mut process = PtyProcess::spawn(&prepared.args, &prepared.cwd, &prepared.env)?;
        tracing::info!(
            task_id = task.id,
            pid = ?process.pid(),
            args = ?prepared.args_used,
            cwd = %prepared.cwd.display(),
            "Launched task"
        );

        let ending = self.watch(task, &mut process, &prepared.passwords, &mut output).await?;
        self.finish_output(&mut process, &mut output).await?;

        let (status, explanation) = match ending {
            Ending::Exited(0) => (TaskStatus::Successful, String::new()),
            Ending::Exited(code) => (TaskStatus::Failed, format!("Job exited with code {}", code)),
            Ending::Canceled => (TaskStatus::Canceled, "Job was canceled".to_string()),
            Ending::IdleTimeout => (
                TaskStatus::Canceled,
                format!(
                    "Job terminated after {}s without output",
                    self.config.idle_timeout_secs
                ),
            ),
        };

        let error_trace = if status == TaskStatus::Failed {
            mask_secrets(&tail_of(&output_path).await, prepared.passwords.secrets())
        } else {
            String::new()
        };

        Ok(RunOutcome {
            status,
            explanation,
            output_location: Some(output_path.to_string_lossy().into_owned()),
            error_trace,
            args_used: prepared.args_used,
            cwd_used: Some(prepared.cwd.to_string_lossy().into_owned()),
            env_used: prepared.env_used,
        })
    }

    fn prepare(&self, task: &TaskNode, scratch: &ScratchSpace) -> LaunchResult<Prepared> {
        let profile = profile_for(task.kind);
        profile.validate(task)?;
        let passwords = profile.passwords(task)?;

        let ctx = LaunchContext {
            task,
            config: &self.config,
            scratch,
        };
        let mut args = profile.args(&ctx)?;
        let cwd = profile.cwd(&ctx);

        let mut env = self.base_env(task, scratch);
        env.extend(profile.env(&ctx));
        let env_used = redact_env(&env);

        if let Some(key) = profile.private_key(task) {
            let key_path = scratch
                .write_private("ssh_key", key.as_bytes())
                .map_err(LaunchError::Scratch)?;
            args = wrap_with_key_agent(&args, &key_path);
        }
        if let Some(sandbox) = SandboxWrapper::from_config(&self.config) {
            args = sandbox.wrap(&args, &cwd, scratch).map_err(LaunchError::Scratch)?;
        }
        let args_used = redact_args(&args);

        Ok(Prepared {
            args,
            args_used,
            cwd,
            env,
            env_used,
            passwords,
        })
    }

    fn base_env(&self, task: &TaskNode, scratch: &ScratchSpace) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "PATH".to_string(),
            std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()),
        );
        env.insert(
            "HOME".to_string(),
            std::env::var("HOME").unwrap_or_else(|_| scratch.path().to_string_lossy().into_owned()),
        );
        env.insert("LANG".to_string(), "C.UTF-8".to_string());
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        env.insert("ANSIBLE_FORCE_COLOR".to_string(), "0".to_string());
        env.insert("JOB_ID".to_string(), task.id.to_string());
        env.insert("JOB_KIND".to_string(), task.kind.to_string());
        env.insert("JOB_EVENT_SUBJECT".to_string(), self.config.event_subject.clone());
        if let Some(url) = &self.config.event_url {
            env.insert("JOB_EVENT_URL".to_string(), url.clone());
        }
        env
    }

    /// Pump output until the child exits, is canceled or goes idle.
    async fn watch(
        &self,
        task: &TaskNode,
        process: &mut PtyProcess,
        passwords: &PasswordTable,
        output: &mut tokio::fs::File,
    ) -> LaunchResult<Ending> {
        let poll = self.config.poll_timeout();
        let idle_timeout = self.config.idle_timeout();
        let mut last_output = Instant::now();
        let mut pending_line = String::new();

        loop {
            match process.next_output(poll).await {
                Output::Chunk(chunk) => {
                    output.write_all(&chunk).await?;
                    last_output = Instant::now();

                    pending_line.push_str(&String::from_utf8_lossy(&chunk));
                    if let Some(pos) = pending_line.rfind('\n') {
                        pending_line.drain(..=pos);
                    }
                    keep_tail(&mut pending_line, PROMPT_WINDOW);
                    if let Some(answer) = passwords.answer_for(&pending_line) {
                        tracing::debug!(task_id = task.id, "Answering prompt");
                        process.write_line(answer)?;
                        pending_line.clear();
                    }
                }
                Output::Idle => {}
                Output::Closed => tokio::time::sleep(poll.min(Duration::from_millis(100))).await,
            }

            if let Some(code) = process.try_wait()? {
                return Ok(Ending::Exited(code));
            }

            if self.cancel_requested(task.id).await {
                tracing::info!(task_id = task.id, "Cancel requested, interrupting child");
                self.interrupt(task, process).await?;
                return Ok(Ending::Canceled);
            }

            if let Some(limit) = idle_timeout {
                if last_output.elapsed() >= limit {
                    tracing::warn!(task_id = task.id, idle_secs = limit.as_secs(), "Idle timeout, killing child");
                    process.kill()?;
                    process.wait_timeout(self.config.cancel_grace()).await?;
                    return Ok(Ending::IdleTimeout);
                }
            }
        }
    }

    /// Interrupt, give the child the grace period to exit, then kill it.
    async fn interrupt(&self, task: &TaskNode, process: &mut PtyProcess) -> LaunchResult<()> {
        if let Err(e) = process.interrupt() {
            tracing::warn!(task_id = task.id, error = %e, "Failed to interrupt child");
        }
        if process.wait_timeout(self.config.cancel_grace()).await?.is_none() {
            tracing::warn!(task_id = task.id, "Child ignored interrupt, killing");
            process.kill()?;
            process.wait_timeout(Duration::from_secs(1)).await?;
        }
        Ok(())
    }

    /// Copy output produced just before exit.
    async fn finish_output(&self, process: &mut PtyProcess, output: &mut tokio::fs::File) -> LaunchResult<()> {
        loop {
            match process.next_output(Duration::from_millis(200)).await {
                Output::Chunk(chunk) => output.write_all(&chunk).await?,
                Output::Idle | Output::Closed => break,
            }
        }
        output.write_all(&process.drain_buffered()).await?;
        output.flush().await?;
        Ok(())
    }

    /// Fresh read of the cancel flag; store errors count as "not canceled".
    async fn cancel_requested(&self, id: job_core::TaskId) -> bool {
        match self.store.get(id).await {
            Ok(task) => task.cancel_flag,
            Err(e) => {
                tracing::warn!(task_id = id, error = %e, "Failed to read cancel flag");
                false
            }
        }
    }
}

/// Shorten `text` to at most `max` bytes without splitting a character.
fn truncate_chars(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let cut = (0..=max).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
    text.truncate(cut);
}

/// Drop the front of `text` so at most `max` bytes remain, on a character boundary.
fn keep_tail(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let start = (text.len() - max..=text.len())
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(text.len());
    text.drain(..start);
}

/// Last few KiB of the captured output.
async fn tail_of(path: &std::path::Path) -> String {
    const TAIL: usize = 4096;
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let start = bytes.len().saturating_sub(TAIL);
            String::from_utf8_lossy(&bytes[start..]).into_owned()
        }
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_multibyte_explanation_is_clipped() {
        for pad in 0..4 {
            let detail = format!("{}{}", "x".repeat(pad), "é".repeat(600));
            let outcome = RunOutcome::from_error(&LaunchError::Invalid(detail));
            assert_eq!(outcome.status, TaskStatus::Failed);
            assert!(outcome.explanation.len() <= MAX_EXPLANATION);
            assert!(outcome.explanation.starts_with("Invalid launch parameters:"));
        }
    }

    #[test]
    fn test_keep_tail_bounds_unterminated_line() {
        let mut line = format!("{}{}Vault password: ", "é".repeat(5000), "#".repeat(3));
        keep_tail(&mut line, PROMPT_WINDOW);
        assert!(line.len() <= PROMPT_WINDOW);
        assert!(line.ends_with("Vault password: "));

        let mut short = "Password:".to_string();
        keep_tail(&mut short, PROMPT_WINDOW);
        assert_eq!(short, "Password:");
    }

    #[test]
    fn test_recorded_args_are_the_wrapped_ones() {
        use job_core::notify::NullNotifier;
        use job_core::{Credential, MemoryJobStore, NewTask, TaskKind, TaskSpec};

        let launcher = Launcher::new(
            LauncherConfig::default(),
            Arc::new(MemoryJobStore::new()),
            Arc::new(NullNotifier),
        );
        let spec = TaskSpec {
            module_name: Some("ping".to_string()),
            inventory_path: Some("/srv/inventory/hosts".to_string()),
            credential: Some(Credential {
                ssh_key_data: Some("-----BEGIN KEY-----".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let task = NewTask::new(TaskKind::AdHoc, "ping").with_spec(spec).into_node(7, Utc::now());
        let scratch = ScratchSpace::new(None, "engine-test-").unwrap();

        let prepared = launcher.prepare(&task, &scratch).unwrap();
        assert_eq!(prepared.args[0], "ssh-agent");
        assert_eq!(prepared.args_used, redact_args(&prepared.args));
        assert!(prepared.args_used.last().unwrap().contains("ssh-add"));
    }

    #[test]
    fn test_truncate_keeps_short_text() {
        let mut text = "Job exited with code 2".to_string();
        truncate_chars(&mut text, MAX_EXPLANATION);
        assert_eq!(text, "Job exited with code 2");
    }
}
