//! Child process attached to a pseudo-terminal.
//!
//! Tools that prompt for secrets only do so on a terminal, so every launched
//! child gets one. Output is read on a dedicated thread and delivered as raw
//! chunks over a channel; the supervising loop waits on it with a timeout.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use crate::error::{LaunchError, LaunchResult};

/// Result of waiting for output.
#[derive(Debug, PartialEq, Eq)]
pub enum Output {
    Chunk(Vec<u8>),
    /// Nothing arrived within the timeout.
    Idle,
    /// The terminal closed; no more output will arrive.
    Closed,
}

pub struct PtyProcess {
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    // Keeps the terminal open for the reader thread.
    _master: Box<dyn MasterPty + Send>,
    output: mpsc::UnboundedReceiver<Vec<u8>>,
    pid: Option<u32>,
}

impl PtyProcess {
    /// Spawn `argv` with exactly `env` as its environment.
    pub fn spawn(argv: &[String], cwd: &Path, env: &BTreeMap<String, String>) -> LaunchResult<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| LaunchError::Invalid("empty command line".to_string()))?;

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 24,
                cols: 200,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| LaunchError::Spawn(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(cwd);
        cmd.env_clear();
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| LaunchError::Spawn(format!("{}: {}", program, e)))?;

        // Drop the slave so the reader sees EOF once the child exits
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| LaunchError::Spawn(format!("Failed to read PTY: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| LaunchError::Spawn(format!("Failed to write PTY: {}", e)))?;

        let (tx, output) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let pid = child.process_id();
        tracing::debug!(pid = ?pid, program = %program, "Spawned child on PTY");

        Ok(Self {
            child,
            writer,
            _master: pair.master,
            output,
            pid,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait up to `timeout` for the next output chunk.
    pub async fn next_output(&mut self, timeout: Duration) -> Output {
        match tokio::time::timeout(timeout, self.output.recv()).await {
            Ok(Some(chunk)) => Output::Chunk(chunk),
            Ok(None) => Output::Closed,
            Err(_) => Output::Idle,
        }
    }

    /// Send one line of input, as if typed.
    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    /// Send SIGINT to the child's process group.
    pub fn interrupt(&self) -> nix::Result<()> {
        self.signal(Signal::SIGINT)
    }

    fn signal(&self, signal: Signal) -> nix::Result<()> {
        match self.pid {
            // The child leads its own session on the PTY, so its pid is the group id.
            Some(pid) => killpg(Pid::from_raw(pid as i32), signal),
            None => Err(nix::errno::Errno::ESRCH),
        }
    }

    /// Forcibly terminate the child.
    pub fn kill(&mut self) -> std::io::Result<()> {
        if self.signal(Signal::SIGKILL).is_ok() {
            return Ok(());
        }
        self.child.kill()
    }

    /// Exit code if the child has exited.
    pub fn try_wait(&mut self) -> std::io::Result<Option<u32>> {
        Ok(self.child.try_wait()?.map(|status| status.exit_code()))
    }

    /// Poll until the child exits or `timeout` elapses.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<u32>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(code) = self.try_wait()? {
                return Ok(Some(code));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Output already received but not yet consumed.
    pub fn drain_buffered(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        while let Ok(chunk) = self.output.try_recv() {
            rest.extend_from_slice(&chunk);
        }
        rest
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.try_wait() {
            let _ = self.kill();
            let _ = self.child.wait();
        }
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> BTreeMap<String, String> {
        BTreeMap::from([("PATH".to_string(), "/usr/bin:/bin".to_string())])
    }

    async fn read_until(process: &mut PtyProcess, needle: &str) -> String {
        let mut seen = String::new();
        for _ in 0..100 {
            match process.next_output(Duration::from_millis(100)).await {
                Output::Chunk(chunk) => seen.push_str(&String::from_utf8_lossy(&chunk)),
                Output::Closed => break,
                Output::Idle => {}
            }
            if seen.contains(needle) {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_answers_prompt_on_terminal() {
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            r#"printf 'Password: '; read answer; echo "got-$answer""#.to_string(),
        ];
        let mut process = PtyProcess::spawn(&argv, Path::new("/"), &env()).unwrap();

        let prompt = read_until(&mut process, "Password: ").await;
        assert!(prompt.contains("Password: "));

        process.write_line("hunter2").unwrap();
        let rest = read_until(&mut process, "got-hunter2").await;
        assert!(rest.contains("got-hunter2"));
        assert_eq!(process.wait_timeout(Duration::from_secs(5)).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let mut process = PtyProcess::spawn(&argv, Path::new("/"), &env()).unwrap();
        assert_eq!(process.wait_timeout(Duration::from_secs(5)).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_interrupt_reaches_child() {
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "trap 'exit 7' INT; echo ready; while true; do sleep 0.1; done".to_string(),
        ];
        let mut process = PtyProcess::spawn(&argv, Path::new("/"), &env()).unwrap();
        read_until(&mut process, "ready").await;

        process.interrupt().unwrap();
        let code = process.wait_timeout(Duration::from_secs(5)).await.unwrap();
        assert!(code.is_some());
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let err = PtyProcess::spawn(&[], Path::new("/"), &env()).unwrap_err();
        assert!(matches!(err, LaunchError::Invalid(_)));
    }
}
