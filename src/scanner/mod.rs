mod detector;
mod size_calculator;
mod walker;

pub use detector::RepoDetector;
pub use size_calculator::{calculate_dir_size, latest_modification};
pub use walker::{ScanHandle, Scanner};

use crate::utils::format_size;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A git repository that carries a virtual environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenvEntry {
    /// Root directory of the repository (parent of `.git`)
    pub repo_path: PathBuf,

    /// Virtual environment directory inside the repository
    pub venv_path: PathBuf,

    /// Whether the repository has a manifest file next to the environment
    pub has_manifest: bool,

    /// Most recent modification anywhere inside the environment
    pub last_modified: DateTime<Utc>,

    /// Size of the environment in bytes
    pub size: u64,

    /// Whether this environment is marked for deletion
    #[serde(default)]
    pub selected: bool,
}

impl VenvEntry {
    /// Returns a human-readable size string
    pub fn size_human(&self) -> String {
        format_size(self.size)
    }

    /// Returns how many days since last modification
    pub fn days_since_modified(&self) -> i64 {
        let now = Utc::now();
        (now - self.last_modified).num_days()
    }
}

/// Snapshot of how far a scan has progressed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanProgress {
    /// Directory the walker is currently looking at
    pub current_path: PathBuf,

    /// Repositories with an environment found so far
    pub repos_found: usize,

    /// Directories visited so far
    pub folders_scanned: usize,
}
