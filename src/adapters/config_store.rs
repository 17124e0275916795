use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::{AppConfig, DomainError};
use crate::ports::ConfigStore;

const APP_DIR_NAME: &str = "DevScope";

/// TOML-based configuration store with OS-specific paths.
pub struct TomlConfigStore {
    data_dir: PathBuf,
    logs_dir: PathBuf,
}

impl TomlConfigStore {
    /// Store rooted in the OS application directories.
    pub fn new() -> Result<Self, DomainError> {
        let data_dir = Self::default_data_dir()?;
        let logs_dir = Self::default_logs_dir(&data_dir);
        Self::create(data_dir, logs_dir)
    }

    /// Store rooted in `dir`, with logs under `dir/logs`.
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let data_dir = dir.into();
        let logs_dir = data_dir.join("logs");
        Self::create(data_dir, logs_dir)
    }

    fn create(data_dir: PathBuf, logs_dir: PathBuf) -> Result<Self, DomainError> {
        fs::create_dir_all(&data_dir)?;
        info!(data_dir = ?data_dir, "ConfigStore initialized");
        Ok(Self { data_dir, logs_dir })
    }

    /// - macOS: ~/Library/Application Support/DevScope/
    /// - Windows: %APPDATA%\DevScope\
    /// - Linux: ~/.config/DevScope/
    fn default_data_dir() -> Result<PathBuf, DomainError> {
        #[cfg(target_os = "macos")]
        let base = dirs::data_dir();

        #[cfg(not(target_os = "macos"))]
        let base = dirs::config_dir();

        base.map(|p| p.join(APP_DIR_NAME)).ok_or_else(|| {
            DomainError::Config("Could not find application data directory".to_string())
        })
    }

    /// - macOS: inside the data dir
    /// - Windows: %LOCALAPPDATA%\DevScope\logs\
    /// - Linux: ~/.local/share/DevScope/logs/
    fn default_logs_dir(data_dir: &Path) -> PathBuf {
        #[cfg(target_os = "macos")]
        let base: Option<PathBuf> = None;

        #[cfg(target_os = "windows")]
        let base = dirs::data_local_dir();

        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        let base = dirs::data_dir();

        base.map(|p| p.join(APP_DIR_NAME).join("logs"))
            .unwrap_or_else(|| data_dir.join("logs"))
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<AppConfig, DomainError> {
        let config_path = self.config_path();

        if config_path.exists() {
            debug!(path = ?config_path, "Loading configuration");
            let content = fs::read_to_string(&config_path)?;
            let config: AppConfig = toml::from_str(&content)?;
            info!(path = ?config_path, tools = config.tools.len(), "Configuration loaded");
            Ok(config)
        } else {
            info!(path = ?config_path, "Configuration file not found, creating default");
            let config = AppConfig::new();
            self.save(&config)?;
            Ok(config)
        }
    }

    fn save(&self, config: &AppConfig) -> Result<(), DomainError> {
        let config_path = self.config_path();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&config_path, content)?;

        info!(path = ?config_path, "Configuration saved");
        Ok(())
    }

    fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    fn logs_dir(&self) -> PathBuf {
        self.logs_dir.clone()
    }
}
