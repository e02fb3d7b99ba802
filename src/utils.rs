use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Format bytes into a human-readable size.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Resolve the scan root: default to the current directory, make it
/// absolute, and require that it exists.
pub fn resolve_root(path: Option<PathBuf>) -> Result<PathBuf> {
    let path = path.unwrap_or_else(|| PathBuf::from("."));
    let absolute = std::path::absolute(&path)
        .with_context(|| format!("Error resolving path: {}", path.display()))?;

    if !absolute.exists() {
        bail!("Path does not exist: {}", absolute.display());
    }

    Ok(absolute)
}

/// Keep the tail of a long path so it fits in `max` characters.
pub fn shorten_path(path: &Path, max: usize) -> String {
    let display = path.display().to_string();
    let count = display.chars().count();
    if count <= max || max <= 3 {
        return display;
    }

    let tail: String = display.chars().skip(count - (max - 3)).collect();
    format!("...{}", tail)
}
