use super::{RepoDetector, ScanProgress, VenvEntry};
use crossbeam::channel::{self, select, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::debug;
use walkdir::WalkDir;

/// Walks a directory tree looking for git repositories with an environment
#[derive(Debug, Clone)]
pub struct Scanner {
    /// Root path to scan
    root: PathBuf,

    /// Name of the version-control marker directory
    marker_dir: String,

    detector: RepoDetector,
}

/// Receiving side of a running scan.
///
/// Both channels are zero-capacity: the walker blocks on every publish until
/// the consumer takes the value, so what the consumer has seen is exactly how
/// far the walk has got. The walk is finished once both channels are
/// disconnected.
pub struct ScanHandle {
    pub entries: Receiver<VenvEntry>,
    pub progress: Receiver<ScanProgress>,
}

impl Scanner {
    /// Create a new scanner for the given root path
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            marker_dir: String::from(".git"),
            detector: RepoDetector::default(),
        }
    }

    /// Set the repository detector
    pub fn detector(mut self, detector: RepoDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Set the name of the directory that marks a repository root
    pub fn marker_dir(mut self, name: impl Into<String>) -> Self {
        self.marker_dir = name.into();
        self
    }

    /// Start the walk on a background thread and return its streams
    pub fn scan(&self) -> ScanHandle {
        let (entry_tx, entry_rx) = channel::bounded(0);
        let (progress_tx, progress_rx) = channel::bounded(0);

        let walk = Walk {
            root: self.root.clone(),
            marker_dir: self.marker_dir.clone(),
            detector: self.detector.clone(),
            entries: entry_tx,
            progress: Some(progress_tx),
            repos_found: 0,
            folders_scanned: 0,
        };

        thread::spawn(move || walk.run());

        ScanHandle {
            entries: entry_rx,
            progress: progress_rx,
        }
    }
}

impl ScanHandle {
    /// Consume both streams until they close, returning the entries in
    /// discovery order and handing every progress snapshot to `on_progress`.
    pub fn drain<F>(self, mut on_progress: F) -> Vec<VenvEntry>
    where
        F: FnMut(&ScanProgress),
    {
        let mut entries = Some(self.entries);
        let mut progress = Some(self.progress);
        let mut found = Vec::new();

        while entries.is_some() || progress.is_some() {
            // A closed stream is swapped for `never` so it stops winning the select.
            let entries_rx = entries.clone().unwrap_or_else(channel::never);
            let progress_rx = progress.clone().unwrap_or_else(channel::never);

            select! {
                recv(entries_rx) -> msg => match msg {
                    Ok(entry) => found.push(entry),
                    Err(_) => entries = None,
                },
                recv(progress_rx) -> msg => match msg {
                    Ok(snapshot) => on_progress(&snapshot),
                    Err(_) => progress = None,
                },
            }
        }

        found
    }
}

/// State owned by the background walker thread
struct Walk {
    root: PathBuf,
    marker_dir: String,
    detector: RepoDetector,
    entries: Sender<VenvEntry>,
    progress: Option<Sender<ScanProgress>>,
    repos_found: usize,
    folders_scanned: usize,
}

impl Walk {
    fn run(mut self) {
        let mut iter = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(next) = iter.next() {
            let entry = match next {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable path");
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();

            if name == self.marker_dir.as_str() {
                iter.skip_current_dir();

                let Some(repo_path) = entry.path().parent() else {
                    continue;
                };
                if !self.on_repository(repo_path) {
                    return;
                }
                continue;
            }

            if entry.depth() > 0 && name.starts_with('.') {
                iter.skip_current_dir();
                continue;
            }

            self.folders_scanned += 1;
            self.publish_progress(entry.path());
        }

        debug!(
            root = %self.root.display(),
            folders = self.folders_scanned,
            repos = self.repos_found,
            "scan finished"
        );
    }

    /// Returns false once the entry receiver is gone and the walk should stop.
    fn on_repository(&mut self, repo_path: &Path) -> bool {
        self.publish_progress(repo_path);

        let Some(found) = self.detector.probe(repo_path) else {
            return true;
        };

        self.repos_found += 1;
        if self.entries.send(found).is_err() {
            debug!("entry receiver dropped, stopping scan");
            return false;
        }
        self.publish_progress(repo_path);
        true
    }

    fn publish_progress(&mut self, path: &Path) {
        let Some(tx) = &self.progress else {
            return;
        };

        let snapshot = ScanProgress {
            current_path: path.to_path_buf(),
            repos_found: self.repos_found,
            folders_scanned: self.folders_scanned,
        };

        if tx.send(snapshot).is_err() {
            self.progress = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::calculate_dir_size;
    use crossbeam::channel::TryRecvError;
    use std::collections::BTreeSet;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn make_repo(root: &Path, rel: &str, venv: bool, manifest: bool) -> PathBuf {
        let repo = root.join(rel);
        fs::create_dir_all(repo.join(".git").join("objects")).unwrap();
        if venv {
            let site = repo.join(".venv").join("lib").join("site-packages");
            fs::create_dir_all(&site).unwrap();
            fs::write(site.join("module.py"), vec![b'x'; 2048]).unwrap();
            fs::write(repo.join(".venv").join("pyvenv.cfg"), "version = 3.12").unwrap();
        }
        if manifest {
            fs::write(repo.join("pyproject.toml"), "[project]\n").unwrap();
        }
        repo
    }

    #[test]
    fn test_finds_only_repos_with_venv() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let with_venv = make_repo(root, "alpha", true, true);
        make_repo(root, "beta", false, true);
        let gamma = make_repo(root, "gamma", false, false);
        fs::write(gamma.join(".venv"), "file, not a directory").unwrap();
        // Environment outside of any repository
        fs::create_dir_all(root.join("loose").join(".venv")).unwrap();

        let entries = Scanner::new(root).scan().drain(|_| {});

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].repo_path, with_venv);
        assert!(entries[0].has_manifest);
        assert_eq!(entries[0].size, calculate_dir_size(&entries[0].venv_path).unwrap());
        assert_eq!(entries[0].size, 2048 + "version = 3.12".len() as u64);
    }

    #[test]
    fn test_folder_count_skips_hidden_and_marker_dirs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        // root, repo, repo/src, other, plain, plain/deep => 6 folders
        let repo = make_repo(root, "repo", true, false);
        fs::create_dir_all(repo.join("src")).unwrap();
        make_repo(root, "other", false, false);
        fs::create_dir_all(root.join("plain").join("deep")).unwrap();
        fs::create_dir_all(root.join(".cache").join("nested").join("more")).unwrap();

        let mut snapshots = Vec::new();
        let entries = Scanner::new(root).scan().drain(|p| snapshots.push(p.clone()));

        assert_eq!(entries.len(), 1);
        let last = snapshots.last().unwrap();
        assert_eq!(last.folders_scanned, 6);
        assert_eq!(last.repos_found, 1);
        assert!(snapshots
            .iter()
            .all(|p| !p.current_path.starts_with(root.join(".cache"))));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        for name in ["a", "b", "c"] {
            make_repo(root, name, true, false);
            fs::create_dir_all(root.join(name).join("pkg").join("sub")).unwrap();
        }

        let mut snapshots: Vec<ScanProgress> = Vec::new();
        Scanner::new(root).scan().drain(|p| snapshots.push(p.clone()));

        for pair in snapshots.windows(2) {
            assert!(pair[1].folders_scanned >= pair[0].folders_scanned);
            assert!(pair[1].repos_found >= pair[0].repos_found);
        }
        assert_eq!(snapshots.last().unwrap().repos_found, 3);
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Entry(PathBuf),
        Progress(usize),
    }

    #[test]
    fn test_entry_arrives_before_its_progress_update() {
        let temp = TempDir::new().unwrap();
        let repo = make_repo(temp.path(), "only", true, false);

        let handle = Scanner::new(temp.path()).scan();
        let mut events = Vec::new();
        let mut entries = Some(handle.entries);
        let mut progress = Some(handle.progress);
        while entries.is_some() || progress.is_some() {
            let entries_rx = entries.clone().unwrap_or_else(channel::never);
            let progress_rx = progress.clone().unwrap_or_else(channel::never);
            select! {
                recv(entries_rx) -> msg => match msg {
                    Ok(entry) => events.push(Event::Entry(entry.repo_path)),
                    Err(_) => entries = None,
                },
                recv(progress_rx) -> msg => match msg {
                    Ok(p) => events.push(Event::Progress(p.repos_found)),
                    Err(_) => progress = None,
                },
            }
        }

        let entry_pos = events
            .iter()
            .position(|e| *e == Event::Entry(repo.clone()))
            .unwrap();
        let first_found = events
            .iter()
            .position(|e| *e == Event::Progress(1))
            .unwrap();
        assert!(entry_pos < first_found);
        assert!(events[..entry_pos]
            .iter()
            .all(|e| matches!(e, Event::Progress(0))));
    }

    #[test]
    fn test_nested_repositories_in_discovery_order() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let outer = make_repo(root, "outer", true, true);
        let inner = make_repo(root, "outer/libs/inner", true, false);
        let zeta = make_repo(root, "zeta", true, false);

        let entries = Scanner::new(root).scan().drain(|_| {});
        let repos: Vec<_> = entries.iter().map(|e| e.repo_path.clone()).collect();

        assert_eq!(repos, vec![outer, inner, zeta]);
    }

    #[test]
    fn test_scan_twice_yields_same_entries() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        make_repo(root, "one", true, true);
        make_repo(root, "two", true, false);
        make_repo(root, "deep/three", true, true);
        make_repo(root, "four", false, true);

        let key = |entries: Vec<VenvEntry>| -> BTreeSet<(PathBuf, bool)> {
            entries
                .into_iter()
                .map(|e| (e.repo_path, e.has_manifest))
                .collect()
        };

        let scanner = Scanner::new(root);
        let first = key(scanner.scan().drain(|_| {}));
        let second = key(scanner.scan().drain(|_| {}));

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_tree_closes_streams() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("docs")).unwrap();

        let handle = Scanner::new(temp.path()).scan();
        let progress: Vec<_> = handle.progress.iter().collect();
        let entries: Vec<_> = handle.entries.iter().collect();

        assert!(entries.is_empty());
        assert_eq!(progress.len(), 2);
    }

    #[test]
    fn test_missing_root_closes_streams() {
        let temp = TempDir::new().unwrap();
        let entries = Scanner::new(temp.path().join("gone")).scan().drain(|_| {});
        assert!(entries.is_empty());
    }

    #[test]
    fn test_dropping_progress_keeps_entries_flowing() {
        let temp = TempDir::new().unwrap();
        make_repo(temp.path(), "a", true, false);
        make_repo(temp.path(), "b", true, false);

        let ScanHandle { entries, progress } = Scanner::new(temp.path()).scan();
        drop(progress);

        assert_eq!(entries.iter().count(), 2);
    }

    #[test]
    fn test_hidden_root_is_scanned() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join(".projects");
        make_repo(&root, "app", true, false);

        let entries = Scanner::new(&root).scan().drain(|_| {});
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_custom_marker_and_detector() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("hg-project");
        fs::create_dir_all(repo.join(".hg")).unwrap();
        fs::create_dir_all(repo.join("venv").join("bin")).unwrap();
        fs::write(repo.join("venv").join("bin").join("python"), "#!").unwrap();

        let entries = Scanner::new(temp.path())
            .marker_dir(".hg")
            .detector(RepoDetector::new("venv", "setup.cfg"))
            .scan()
            .drain(|_| {});

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].venv_path, repo.join("venv"));
        assert!(!entries[0].has_manifest);
    }

    #[test]
    fn test_streams_are_unbuffered() {
        let temp = TempDir::new().unwrap();
        make_repo(temp.path(), "a", true, false);
        fs::create_dir_all(temp.path().join("b").join("c")).unwrap();

        let handle = Scanner::new(temp.path()).scan();
        assert_eq!(handle.entries.capacity(), Some(0));
        assert_eq!(handle.progress.capacity(), Some(0));

        // Nobody is receiving, so the walker must still be parked on its first snapshot
        thread::sleep(Duration::from_millis(100));
        assert_eq!(handle.entries.try_recv(), Err(TryRecvError::Empty));

        let first = handle.progress.try_recv().unwrap();
        assert_eq!(first.current_path, temp.path());
        assert_eq!(first.folders_scanned, 1);

        let second = handle.progress.recv().unwrap();
        assert_eq!(second.current_path, temp.path().join("a"));
        assert_eq!(second.folders_scanned, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_paths_do_not_abort_scan() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let first = make_repo(root, "a", true, false);
        let last = make_repo(root, "z", true, false);
        std::os::unix::fs::symlink(root.join("nowhere"), root.join("m-dangling")).unwrap();
        std::os::unix::fs::symlink(root.join("nowhere"), last.join(".venv").join("broken"))
            .unwrap();

        let locked = root.join("locked");
        make_repo(&locked, "inner", true, false);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users read through the mode bits
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let entries = Scanner::new(root).scan().drain(|_| {});
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let repos: Vec<_> = entries.iter().map(|e| e.repo_path.clone()).collect();
        assert_eq!(repos, vec![first, last]);
        assert_eq!(entries[1].size, 2048 + "version = 3.12".len() as u64);
    }
}
