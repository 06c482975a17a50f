//! Settings file and application directories.
//!
//! The CLI reads one TOML file describing the rclone setup, the destination,
//! and the sources to mirror. This is the boundary where loose configuration
//! becomes a typed [`SyncRunOptions`]; the sync engine never reads files.
//!
//! ```toml
//! rclone = "/usr/local/bin/rclone"      # optional, found on PATH otherwise
//! rclone_config = "~/.config/cloudmirror/rclone.conf"
//! log_file = "~/.local/share/cloudmirror/sync.log"
//!
//! [destination]
//! remote = "pfuser"
//! bucket = "data"
//!
//! [runner]
//! timeout_secs = 0                      # 0 waits forever
//! max_output_mb = 64
//!
//! [[sources]]
//! name = "gdrive1"
//! kind = "drive"
//! subfolder = "notes"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sources::registry::{MetadataMap, RegistryError, SourceRemote, load_metadata};
use crate::sources::runner::TokioRunner;
use crate::sources::sync::SyncRunOptions;

/// Environment variable that overrides the settings file location.
pub const SETTINGS_ENV: &str = "CLOUDMIRROR_SETTINGS";

const DEFAULT_MAX_OUTPUT_MB: usize = 64;

/// Errors loading settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot determine the cloudmirror config directory")]
    NoProjectDirs,

    #[error("rclone executable not found on PATH: {0}")]
    RcloneNotFound(#[from] which::Error),

    #[error("rclone config file {0} does not exist")]
    MissingRcloneConfig(PathBuf),

    #[error(transparent)]
    Metadata(#[from] RegistryError),
}

/// Destination remote and bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSettings {
    pub remote: String,
    pub bucket: String,
}

/// Process runner limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Per-command timeout; 0 disables it.
    pub timeout_secs: u64,
    /// Capture limit per output stream, in MiB.
    pub max_output_mb: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            max_output_mb: DEFAULT_MAX_OUTPUT_MB,
        }
    }
}

/// Contents of `settings.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// rclone executable; resolved from PATH when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rclone: Option<PathBuf>,
    /// Merged rclone config with source and destination credentials.
    pub rclone_config: PathBuf,
    pub destination: DestinationSettings,
    #[serde(default)]
    pub sources: Vec<SourceRemote>,
    #[serde(default)]
    pub runner: RunnerSettings,
    /// Transcript log file; every run is appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Remote metadata JSON; defaults to `remote-metadata.json` next to the settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_file: Option<PathBuf>,
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::from_str(data)?;
        settings.rclone = settings.rclone.map(|p| expand_tilde(&p));
        settings.rclone_config = expand_tilde(&settings.rclone_config);
        settings.log_file = settings.log_file.map(|p| expand_tilde(&p));
        settings.metadata_file = settings.metadata_file.map(|p| expand_tilde(&p));
        Ok(settings)
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Settings = content.parse()?;
        if settings.metadata_file.is_none() {
            settings.metadata_file = path
                .parent()
                .map(|dir| dir.join("remote-metadata.json"));
        }
        tracing::debug!(
            path = %path.display(),
            sources = settings.sources.len(),
            "loaded settings"
        );
        Ok(settings)
    }

    /// Runner configured with the timeout and output limits.
    pub fn runner(&self) -> TokioRunner {
        TokioRunner::new()
            .with_max_output_bytes(self.runner.max_output_mb.max(1) * 1024 * 1024)
            .with_timeout(Some(Duration::from_secs(self.runner.timeout_secs)))
    }

    /// The rclone executable, from settings or PATH.
    pub fn rclone_executable(&self) -> Result<PathBuf, ConfigError> {
        match &self.rclone {
            Some(path) => Ok(path.clone()),
            None => Ok(which::which("rclone")?),
        }
    }

    /// Remote metadata, or an empty map when no file is configured.
    pub fn metadata(&self) -> Result<MetadataMap, ConfigError> {
        match &self.metadata_file {
            Some(path) => Ok(load_metadata(path)?),
            None => Ok(MetadataMap::new()),
        }
    }

    /// Resolve everything a sync run needs.
    pub fn run_options(&self, execute: bool) -> Result<SyncRunOptions, ConfigError> {
        if !self.rclone_config.exists() {
            return Err(ConfigError::MissingRcloneConfig(self.rclone_config.clone()));
        }
        Ok(SyncRunOptions {
            executable: self.rclone_executable()?,
            config_path: self.rclone_config.clone(),
            sources: self.sources.clone(),
            destination_remote: self.destination.remote.clone(),
            bucket: self.destination.bucket.clone(),
            execute,
            metadata: self.metadata()?,
        })
    }
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("", "", "cloudmirror").ok_or(ConfigError::NoProjectDirs)
}

/// Default settings file: `$XDG_CONFIG_HOME/cloudmirror/settings.toml` or platform equivalent.
pub fn default_settings_path() -> Result<PathBuf, ConfigError> {
    Ok(project_dirs()?.config_dir().join("settings.toml"))
}

/// Default data directory for status files.
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Expand a leading `~` against the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
