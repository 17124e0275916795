use std::path::PathBuf;

use crate::domain::{AppConfig, DomainError};

/// Where DevScope keeps its configuration, logs and caches.
pub trait ConfigStore: Send + Sync {
    /// Read `config.toml`, writing the defaults first when it does not exist.
    fn load(&self) -> Result<AppConfig, DomainError>;

    fn save(&self, config: &AppConfig) -> Result<(), DomainError>;

    fn config_path(&self) -> PathBuf;

    fn data_dir(&self) -> PathBuf;

    fn logs_dir(&self) -> PathBuf;

    /// Location of a cache file inside the data directory.
    fn cache_path(&self, file_name: &str) -> PathBuf {
        self.data_dir().join("cache").join(file_name)
    }
}
