use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

/// Calculate total size of a directory recursively.
///
/// Only a failure to open `dir` itself is an error; anything unreadable below
/// it counts as zero bytes.
pub fn calculate_dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => return Err(err.into()),
            Err(_) => continue,
        };

        if entry.file_type().is_file() {
            if let Ok(metadata) = entry.metadata() {
                total += metadata.len();
            }
        }
    }

    Ok(total)
}

/// Find the newest modification time among `dir` and everything below it.
pub fn latest_modification(dir: &Path) -> Result<DateTime<Utc>> {
    let mut latest: Option<SystemTime> = None;

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => return Err(err.into()),
            Err(_) => continue,
        };

        let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(modified) => modified,
            None => continue,
        };

        if latest.map_or(true, |current| modified > current) {
            latest = Some(modified);
        }
    }

    latest
        .map(DateTime::<Utc>::from)
        .ok_or_else(|| anyhow!("No readable entries under {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_size_sums_nested_files() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("venv");
        fs::create_dir_all(dir.join("lib").join("site-packages")).unwrap();
        fs::write(dir.join("pyvenv.cfg"), "home = /usr/bin").unwrap();
        fs::write(dir.join("lib").join("site-packages").join("a.py"), vec![0u8; 1000]).unwrap();
        fs::write(dir.join("lib").join("b.py"), vec![0u8; 24]).unwrap();

        let size = calculate_dir_size(&dir).unwrap();

        assert_eq!(size, "home = /usr/bin".len() as u64 + 1000 + 24);
    }

    #[test]
    fn test_size_of_empty_dir_is_zero() {
        let temp = TempDir::new().unwrap();
        assert_eq!(calculate_dir_size(temp.path()).unwrap(), 0);
    }

    #[test]
    fn test_missing_root_is_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("does-not-exist");

        assert!(calculate_dir_size(&missing).is_err());
        assert!(latest_modification(&missing).is_err());
    }

    #[test]
    fn test_last_modified_is_newest_entry() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("venv");
        fs::create_dir(&dir).unwrap();
        let newest = dir.join("new.txt");
        fs::write(dir.join("old.txt"), "old").unwrap();
        fs::write(&newest, "new").unwrap();

        let newest_mtime: DateTime<Utc> = fs::metadata(&newest).unwrap().modified().unwrap().into();
        let latest = latest_modification(&dir).unwrap();

        assert!(latest >= newest_mtime);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let temp = TempDir::new().unwrap();
        let outside = temp.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("big.bin"), vec![0u8; 4096]).unwrap();

        let dir = temp.path().join("venv");
        fs::create_dir(&dir).unwrap();
        std::os::unix::fs::symlink(&outside, dir.join("link")).unwrap();

        assert_eq!(calculate_dir_size(&dir).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_does_not_abort() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("venv");
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::write(dir.join("bin").join("activate"), vec![0u8; 128]).unwrap();
        std::os::unix::fs::symlink(temp.path().join("nowhere"), dir.join("bin").join("python"))
            .unwrap();

        assert_eq!(calculate_dir_size(&dir).unwrap(), 128);
        assert!(latest_modification(&dir).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdir_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("venv");
        let locked = dir.join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("hidden.bin"), vec![0u8; 4096]).unwrap();
        fs::write(dir.join("visible.bin"), vec![0u8; 512]).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users read through the mode bits
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let size = calculate_dir_size(&dir);
        let latest = latest_modification(&dir);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(size.unwrap(), 512);
        assert!(latest.is_ok());
    }
}
