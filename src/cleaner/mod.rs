use crate::scanner::VenvEntry;
use crate::utils::format_size;
use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, warn};

/// How a directory gets removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalTool {
    /// `rip`, which moves the directory to a graveyard instead of deleting it
    Rip,
    /// `rm -rf`
    Rm,
    /// `std::fs::remove_dir_all`
    Native,
}

impl RemovalTool {
    /// Pick the best mechanism available on this machine
    pub fn detect() -> Self {
        if cfg!(windows) {
            return Self::Native;
        }

        if find_executable("rip").is_some() {
            Self::Rip
        } else if find_executable("rm").is_some() {
            Self::Rm
        } else {
            Self::Native
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rip => "rip",
            Self::Rm => "rm",
            Self::Native => "native",
        }
    }

    /// Remove `path` recursively.
    ///
    /// A path that is already gone is an error, not a no-op.
    pub fn remove(&self, path: &Path) -> Result<(), RemovalError> {
        if fs::symlink_metadata(path).is_err() {
            return Err(RemovalError::Missing(path.to_path_buf()));
        }

        match self {
            Self::Native => fs::remove_dir_all(path).map_err(|source| RemovalError::Io {
                path: path.to_path_buf(),
                source,
            }),
            Self::Rip => run_tool("rip", &[], path),
            Self::Rm => run_tool("rm", &["-rf"], path),
        }
    }
}

/// Why a single removal failed
#[derive(Debug, Error)]
pub enum RemovalError {
    #[error("{} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("failed to delete {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not run `{tool}`: {source}")]
    ToolSpawn {
        tool: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("`{tool}` failed to delete {} ({status}): {output}", .path.display())]
    ToolFailed {
        tool: &'static str,
        path: PathBuf,
        status: std::process::ExitStatus,
        output: String,
    },
}

fn run_tool(tool: &'static str, args: &[&str], path: &Path) -> Result<(), RemovalError> {
    let output = Command::new(tool)
        .args(args)
        .arg(path)
        .output()
        .map_err(|source| RemovalError::ToolSpawn { tool, source })?;

    if output.status.success() {
        return Ok(());
    }

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(RemovalError::ToolFailed {
        tool,
        path: path.to_path_buf(),
        status: output.status,
        output: text.trim().to_string(),
    })
}

/// Look `name` up on `PATH`
fn find_executable(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    find_in_paths(name, &paths)
}

fn find_in_paths(name: &str, paths: &OsStr) -> Option<PathBuf> {
    env::split_paths(paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Snapshot published after each attempted deletion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionProgress {
    /// Entries attempted so far, failures included
    pub current: usize,

    /// Number of selected entries in this run
    pub total: usize,

    /// Entries actually removed so far
    pub removed: usize,

    /// Sum of the recorded sizes of removed entries
    pub bytes_freed: u64,
}

/// A deletion that did not go through
#[derive(Debug)]
pub struct DeletionFailure {
    pub path: PathBuf,
    pub error: RemovalError,
}

/// Outcome of a deletion run
#[derive(Debug, Default)]
pub struct DeletionReport {
    /// Number of directories removed
    pub removed: usize,

    /// Total bytes freed
    pub bytes_freed: u64,

    /// Failed removals, in the order they were attempted
    pub failed: Vec<DeletionFailure>,
}

impl DeletionReport {
    /// Returns a human-readable size string
    pub fn size_freed_human(&self) -> String {
        format_size(self.bytes_freed)
    }
}

/// Removes the selected environments
pub struct Cleaner {
    tool: RemovalTool,
}

impl Cleaner {
    /// Create a cleaner with a fixed removal tool
    pub fn with_tool(tool: RemovalTool) -> Self {
        Self { tool }
    }

    /// Delete every selected entry, publishing a snapshot after each attempt.
    ///
    /// Failures are logged and collected in the report; they never stop the
    /// run. `progress` is dropped on return, which is how the receiver learns
    /// the run is over.
    pub fn delete_selected(
        &self,
        entries: &[VenvEntry],
        progress: Sender<DeletionProgress>,
    ) -> DeletionReport {
        let selected: Vec<&VenvEntry> = entries.iter().filter(|e| e.selected).collect();
        let mut report = DeletionReport::default();

        if selected.is_empty() {
            return report;
        }

        let total = selected.len();
        debug!(total, tool = self.tool.name(), "starting deletion");

        for (idx, entry) in selected.into_iter().enumerate() {
            match self.tool.remove(&entry.venv_path) {
                Ok(()) => {
                    report.removed += 1;
                    report.bytes_freed += entry.size;
                    debug!(path = %entry.venv_path.display(), size = entry.size, "removed");
                }
                Err(error) => {
                    warn!(path = %entry.venv_path.display(), %error, "deletion failed");
                    report.failed.push(DeletionFailure {
                        path: entry.venv_path.clone(),
                        error,
                    });
                }
            }

            let snapshot = DeletionProgress {
                current: idx + 1,
                total,
                removed: report.removed,
                bytes_freed: report.bytes_freed,
            };
            // Keep deleting even if nobody is listening anymore.
            let _ = progress.send(snapshot);
        }

        report
    }

    /// Run `delete_selected` on a background thread.
    ///
    /// The returned channel is zero-capacity and closes when the run is over;
    /// the join handle yields the report with any failures.
    pub fn spawn(
        self,
        entries: Vec<VenvEntry>,
    ) -> (Receiver<DeletionProgress>, JoinHandle<DeletionReport>) {
        let (tx, rx) = channel::bounded(0);
        let handle = thread::spawn(move || self.delete_selected(&entries, tx));
        (rx, handle)
    }
}
