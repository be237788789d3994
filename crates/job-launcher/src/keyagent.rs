//! Private key delivery through an in-memory ssh-agent.
//!
//! The key is written to a private scratch file, loaded into a fresh agent
//! and the file removed before the real command starts, so the child only
//! ever reaches the key through the agent socket.

use std::path::Path;

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@+%".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Wrap `args` so they run inside `ssh-agent` with `key_path` loaded.
pub fn wrap_with_key_agent(args: &[String], key_path: &Path) -> Vec<String> {
    let key = shell_quote(&key_path.to_string_lossy());
    let command = args
        .iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ");

    vec![
        "ssh-agent".to_string(),
        "sh".to_string(),
        "-c".to_string(),
        format!("ssh-add {key} && rm -f {key} && exec {command}"),
    ]
}
