use super::{calculate_dir_size, latest_modification, VenvEntry};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Decides whether a repository root carries a virtual environment
#[derive(Debug, Clone)]
pub struct RepoDetector {
    /// Name of the environment directory (e.g. `.venv`)
    target_dir: String,

    /// Name of the project manifest (e.g. `pyproject.toml`)
    manifest_file: String,
}

impl RepoDetector {
    pub fn new(target_dir: impl Into<String>, manifest_file: impl Into<String>) -> Self {
        Self {
            target_dir: target_dir.into(),
            manifest_file: manifest_file.into(),
        }
    }

    /// Inspect `repo_path` and build an entry if it has an environment.
    ///
    /// Read-only. Anything that prevents the environment from being stat'ed
    /// is treated as "no environment".
    pub fn probe(&self, repo_path: &Path) -> Option<VenvEntry> {
        let venv_path = repo_path.join(&self.target_dir);

        let metadata = match fs::metadata(&venv_path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                debug!(path = %venv_path.display(), error = %err, "cannot stat environment");
                return None;
            }
        };

        if !metadata.is_dir() {
            return None;
        }

        let has_manifest = repo_path.join(&self.manifest_file).exists();

        let size = calculate_dir_size(&venv_path).unwrap_or_else(|err| {
            debug!(path = %venv_path.display(), error = %err, "size probe failed");
            0
        });

        let last_modified = match latest_modification(&venv_path) {
            Ok(time) => time,
            Err(err) => {
                debug!(path = %venv_path.display(), error = %err, "mtime probe failed");
                metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now())
            }
        };

        Some(VenvEntry {
            repo_path: repo_path.to_path_buf(),
            venv_path,
            has_manifest,
            last_modified,
            size,
            selected: false,
        })
    }
}

impl Default for RepoDetector {
    fn default() -> Self {
        Self::new(".venv", "pyproject.toml")
    }
}
