use crate::app::SortMode;
use crate::cleaner::RemovalTool;
use crate::scanner::{RepoDetector, Scanner};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for the cleaner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory name treated as a disposable virtual environment
    pub target_dir: String,

    /// Project manifest whose presence is reported next to each environment
    pub manifest_file: String,

    /// Directory name that marks a repository root
    pub marker_dir: String,

    /// Removal mechanism
    pub removal_tool: ToolPreference,

    /// Initial sort order of the environment list
    pub default_sort: SortMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_dir: String::from(".venv"),
            manifest_file: String::from("pyproject.toml"),
            marker_dir: String::from(".git"),
            removal_tool: ToolPreference::Auto,
            default_sort: SortMode::Time,
        }
    }
}

/// Which removal mechanism to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPreference {
    /// `rip` if installed, then `rm`, then in-process removal
    #[default]
    Auto,
    Rip,
    Rm,
    Native,
}

impl ToolPreference {
    pub fn resolve(self) -> RemovalTool {
        match self {
            Self::Auto => RemovalTool::detect(),
            Self::Rip => RemovalTool::Rip,
            Self::Rm => RemovalTool::Rm,
            Self::Native => RemovalTool::Native,
        }
    }
}

impl Config {
    /// Load config from file, or create default if not exists
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("venv-cleaner").join("config.toml")
        } else {
            PathBuf::from(".venv-cleaner.toml")
        }
    }

    /// Create config directory if it doesn't exist
    pub fn ensure_config_dir() -> Result<PathBuf> {
        let config_path = Self::default_path();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        Ok(config_path)
    }

    /// Build a scanner for `root` following this configuration
    pub fn scanner(&self, root: &Path) -> Scanner {
        let detector = RepoDetector::new(&self.target_dir, &self.manifest_file);

        Scanner::new(root)
            .marker_dir(&self.marker_dir)
            .detector(detector)
    }
}
