//! Bootstrap configuration loading and root folder resolution
//!
//! Configuration sources, highest priority first:
//! 1. Command-line argument
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "COBRA_CONFIG";

/// Environment variable naming the root (data) folder
pub const ROOT_FOLDER_ENV_VAR: &str = "COBRA_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "cobra.db";

/// Bootstrap configuration shared by every Cobra module
///
/// Module-specific sections (watcher, pipeline, clients) are layered on top of
/// this struct with `#[serde(flatten)]` so that a single `cobra.toml` serves all.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Root folder for the database and archives (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit database path; defaults to `<root_folder>/cobra.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Channels to watch
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error), overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One watched channel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// External channel id (e.g. `UC...`)
    pub youtube_id: String,
    /// Display name
    pub name: String,
    /// Summarization instructions for this channel
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl TomlConfig {
    /// Reject empty or duplicated channel ids
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.youtube_id.trim().is_empty() {
                return Err(Error::Config(format!(
                    "channel '{}' has an empty youtube_id",
                    channel.name
                )));
            }
            if !seen.insert(channel.youtube_id.as_str()) {
                return Err(Error::Config(format!(
                    "channel '{}' is configured more than once",
                    channel.youtube_id
                )));
            }
        }
        Ok(())
    }
}

/// Find the config file to load
///
/// Returns `None` when no source names an existing file; callers fall back to
/// built-in defaults in that case. An explicitly requested file that does not
/// exist is an error.
pub fn locate_config_file(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = cli_arg {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(Error::Config(format!(
                "{} points to a missing file: {}",
                CONFIG_ENV_VAR,
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("cobra").join("cobra.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    let system_config = PathBuf::from("/etc/cobra/cobra.toml");
    if system_config.exists() {
        return Ok(Some(system_config));
    }

    Ok(None)
}

/// Parse a TOML config file, or return defaults when there is none
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolve the root folder: CLI → ENV → TOML → OS default
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_root: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_root {
        return path.to_path_buf();
    }

    let fallback = default_root_folder();
    debug!("Using default root folder {}", fallback.display());
    fallback
}

/// Database path: explicit TOML setting, otherwise `<root>/cobra.db`
pub fn resolve_database_path(root_folder: &Path, toml_db: Option<&Path>) -> PathBuf {
    match toml_db {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => root_folder.join(path),
        None => root_folder.join(DATABASE_FILE_NAME),
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("cobra"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\cobra"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("cobra"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/cobra"))
    } else {
        // ~/.local/share/cobra (or /var/lib/cobra for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("cobra"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/cobra"))
    }
}
