//! Prompt answering table.
//!
//! Maps prompt patterns seen on the child's terminal to the secret that
//! answers them. Entries are tried in insertion order.

use job_core::model::ASK;
use regex::Regex;

use crate::error::{LaunchError, LaunchResult};

pub const SSH_KEY_UNLOCK: &[&str] = &[r"Enter passphrase for .*:\s*$"];
pub const BAD_PASSPHRASE: &str = r"Bad passphrase, try again for .*:\s*$";
pub const SSH_PASSWORD: &[&str] = &[r"SSH password:\s*$", r"^Password:\s*$"];
pub const BECOME_PASSWORD: &[&str] = &[
    r"BECOME password.*:\s*$",
    r"(?i)\[?sudo\]? password.*:\s*$",
    r"SU password.*:\s*$",
];
pub const VAULT_PASSWORD: &[&str] = &[r"Vault password:\s*$"];
pub const SCM_USERNAME: &[&str] = &[r"Username for.*:\s*$"];
pub const SCM_PASSWORD: &[&str] = &[r"Password for.*:\s*$"];

#[derive(Debug, Default)]
pub struct PasswordTable {
    entries: Vec<(Regex, String)>,
}

impl PasswordTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every prompt in `patterns` with `answer`.
    pub fn add(&mut self, patterns: &[&str], answer: &str) -> LaunchResult<()> {
        for pattern in patterns {
            let regex = Regex::new(pattern)
                .map_err(|e| LaunchError::Invalid(format!("bad prompt pattern {}: {}", pattern, e)))?;
            self.entries.push((regex, answer.to_string()));
        }
        Ok(())
    }

    /// Add `field`'s value if set. A value still holding the launch-time
    /// sentinel aborts the launch.
    pub fn add_secret(
        &mut self,
        field: &str,
        value: Option<&str>,
        patterns: &[&str],
    ) -> LaunchResult<()> {
        match value {
            Some(ASK) => Err(LaunchError::NeedsInput(field.to_string())),
            Some(value) if !value.is_empty() => self.add(patterns, value),
            _ => Ok(()),
        }
    }

    /// Answer for the current partial line, if any prompt matches.
    pub fn answer_for(&self, pending_line: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(regex, _)| regex.is_match(pending_line))
            .map(|(_, answer)| answer.as_str())
    }

    /// Every secret value in the table, for masking captured output.
    pub fn secrets(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(|(_, answer)| answer.as_str())
            .filter(|a| !a.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_partial_prompt_line() {
        let mut table = PasswordTable::new();
        table.add(SSH_PASSWORD, "hunter2").unwrap();
        table.add(VAULT_PASSWORD, "vault-secret").unwrap();

        assert_eq!(table.answer_for("SSH password: "), Some("hunter2"));
        assert_eq!(table.answer_for("Vault password:"), Some("vault-secret"));
        assert_eq!(table.answer_for("PLAY [all] ****"), None);
        assert_eq!(table.answer_for("SSH password: typed"), None);
    }

    #[test]
    fn test_first_entry_wins() {
        let mut table = PasswordTable::new();
        table.add(&[BAD_PASSPHRASE], "").unwrap();
        table.add(SSH_KEY_UNLOCK, "unlock").unwrap();

        assert_eq!(table.answer_for("Bad passphrase, try again for /tmp/key:"), Some(""));
        assert_eq!(table.answer_for("Enter passphrase for /tmp/key: "), Some("unlock"));
    }

    #[test]
    fn test_deferred_secret_needs_input() {
        let mut table = PasswordTable::new();
        let err = table
            .add_secret("become_password", Some(ASK), BECOME_PASSWORD)
            .unwrap_err();
        assert!(matches!(err, LaunchError::NeedsInput(field) if field == "become_password"));
    }

    #[test]
    fn test_unset_secrets_are_skipped() {
        let mut table = PasswordTable::new();
        table.add_secret("password", None, SSH_PASSWORD).unwrap();
        table.add_secret("password", Some(""), SSH_PASSWORD).unwrap();
        assert!(table.is_empty());

        table.add_secret("become_password", Some("s3cret"), BECOME_PASSWORD).unwrap();
        assert_eq!(table.answer_for("[sudo] password for deploy: "), Some("s3cret"));
        assert_eq!(table.secrets().collect::<Vec<_>>(), vec!["s3cret"; 3]);
    }
}
