//! Filesystem sandbox wrapper.
//!
//! Builds a bubblewrap-style command line: the host root is visible, every
//! hidden path is covered by a fresh empty location from the launch's scratch
//! space, and the allow-list (the job's working directory, its scratch space
//! and operator extras) is bound back through unchanged. Binds apply in order,
//! so allowed paths nested under hidden ones stay visible.

use std::io;
use std::path::{Path, PathBuf};

use crate::config::LauncherConfig;
use crate::scratch::ScratchSpace;

#[derive(Debug, Clone)]
pub struct SandboxWrapper {
    binary: String,
    hide_paths: Vec<PathBuf>,
    show_paths: Vec<PathBuf>,
}

impl SandboxWrapper {
    pub fn new(binary: impl Into<String>, hide_paths: Vec<PathBuf>, show_paths: Vec<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            hide_paths,
            show_paths,
        }
    }

    /// Wrapper configured by the launcher, if sandboxing is enabled.
    pub fn from_config(config: &LauncherConfig) -> Option<Self> {
        config.sandbox_enabled.then(|| {
            Self::new(
                config.sandbox_binary.clone(),
                config.sandbox_hide_paths.clone(),
                config.sandbox_show_paths.clone(),
            )
        })
    }

    pub fn wrap(&self, args: &[String], cwd: &Path, scratch: &ScratchSpace) -> io::Result<Vec<String>> {
        let mut wrapped = vec![
            self.binary.clone(),
            "--die-with-parent".to_string(),
            "--unshare-pid".to_string(),
            "--dev-bind".to_string(),
            "/".to_string(),
            "/".to_string(),
            "--proc".to_string(),
            "/proc".to_string(),
        ];

        for (i, hidden) in self.hide_paths.iter().enumerate() {
            let Ok(metadata) = std::fs::metadata(hidden) else {
                continue;
            };
            let empty = if metadata.is_dir() {
                scratch.make_dir(&format!("hidden-{}", i))?
            } else {
                scratch.write_private(&format!("hidden-{}", i), b"")?
            };
            push_bind(&mut wrapped, &empty, hidden);
        }

        let shown = self
            .show_paths
            .iter()
            .map(PathBuf::as_path)
            .chain([cwd, scratch.path()]);
        for path in shown {
            if path.exists() {
                push_bind(&mut wrapped, path, path);
            }
        }

        wrapped.push("--chdir".to_string());
        wrapped.push(cwd.to_string_lossy().into_owned());
        wrapped.extend(args.iter().cloned());
        Ok(wrapped)
    }
}

fn push_bind(args: &mut Vec<String>, source: &Path, dest: &Path) {
    args.push("--bind".to_string());
    args.push(source.to_string_lossy().into_owned());
    args.push(dest.to_string_lossy().into_owned());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind_pairs(args: &[String]) -> Vec<(String, String)> {
        args.windows(3)
            .filter(|w| w[0] == "--bind")
            .map(|w| (w[1].clone(), w[2].clone()))
            .collect()
    }

    #[test]
    fn test_hidden_paths_are_covered_then_shown_paths_bound() {
        let host = tempfile::tempdir().unwrap();
        let secrets = host.path().join("secrets");
        std::fs::create_dir(&secrets).unwrap();
        let project = secrets.join("project");
        std::fs::create_dir(&project).unwrap();

        let scratch = ScratchSpace::new(None, "sandbox-test-").unwrap();
        let wrapper = SandboxWrapper::new(
            "bwrap",
            vec![secrets.clone(), host.path().join("missing")],
            vec![],
        );
        let args = vec!["ansible-playbook".to_string(), "site.yml".to_string()];
        let wrapped = wrapper.wrap(&args, &project, &scratch).unwrap();

        let binds = bind_pairs(&wrapped);
        assert_eq!(binds.len(), 3);
        assert!(binds[0].0.starts_with(&*scratch.path().to_string_lossy()));
        assert_eq!(binds[0].1, secrets.to_string_lossy());
        assert_eq!(binds[1], (project.to_string_lossy().into_owned(), project.to_string_lossy().into_owned()));
        assert_eq!(binds[2].0, scratch.path().to_string_lossy());

        assert_eq!(wrapped[0], "bwrap");
        assert_eq!(&wrapped[wrapped.len() - 2..], &args[..]);
    }

    #[test]
    fn test_disabled_by_default() {
        assert!(SandboxWrapper::from_config(&LauncherConfig::default()).is_none());
    }
}
