use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::tool::ToolDefinitionConfig;

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Enable file logging with rotation.
    pub file_logging: bool,
    /// Maximum number of log files to keep.
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: true,
            max_files: 7,
        }
    }
}

/// How the batch scanner keys its TTL cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeying {
    /// One slot per distinct (sorted) input list.
    #[default]
    InputList,
    /// A single slot shared by every scan, regardless of input.
    Global,
}

/// Unified batch scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub cache_ttl_secs: u64,
    /// Tools per existence shell invocation (command-line length bound).
    pub existence_chunk_size: usize,
    /// Tools per version shell invocation.
    pub version_chunk_size: usize,
    pub existence_timeout_ms: u64,
    pub version_timeout_ms: u64,
    pub cache_keying: CacheKeying,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            existence_chunk_size: 20,
            version_chunk_size: 10,
            existence_timeout_ms: 10_000,
            version_timeout_ms: 15_000,
            cache_keying: CacheKeying::InputList,
        }
    }
}

impl ScannerConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn existence_timeout(&self) -> Duration {
        Duration::from_millis(self.existence_timeout_ms)
    }

    pub fn version_timeout(&self) -> Duration {
        Duration::from_millis(self.version_timeout_ms)
    }
}

/// Sensing engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tools scanned concurrently by a category scan.
    pub category_batch_size: usize,
    /// Timeout for process listings and custom probes.
    pub probe_timeout_ms: u64,
    /// File name of the cross-session tool cache, relative to the data dir.
    pub cache_file: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            category_batch_size: 5,
            probe_timeout_ms: 10_000,
            cache_file: "tool-cache.json".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Metrics collector and bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Sampling interval used until a subscriber asks for another one.
    pub default_interval_ms: u64,
    /// Grace period after the last unsubscribe before the collector is torn down.
    pub idle_shutdown_ms: u64,
    pub request_timeout_ms: u64,
    /// Budget for each per-tick probe (CPU, memory, disk, battery).
    pub probe_timeout_ms: u64,
    /// Minimum spacing between process-count refreshes.
    pub process_refresh_ms: u64,
    pub process_probe_timeout_ms: u64,
    pub snapshot_timeout_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: 2_000,
            idle_shutdown_ms: 15_000,
            request_timeout_ms: 5_000,
            probe_timeout_ms: 1_500,
            process_refresh_ms: 15_000,
            process_probe_timeout_ms: 4_000,
            snapshot_timeout_ms: 4_000,
        }
    }
}

impl MetricsConfig {
    pub fn idle_shutdown(&self) -> Duration {
        Duration::from_millis(self.idle_shutdown_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn process_refresh(&self) -> Duration {
        Duration::from_millis(self.process_refresh_ms)
    }

    pub fn process_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.process_probe_timeout_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub scanner: ScannerConfig,
    pub engine: EngineConfig,
    pub metrics: MetricsConfig,
    /// Extra tool definitions; an entry with a built-in id replaces the built-in.
    pub tools: Vec<ToolDefinitionConfig>,
}

impl AppConfig {
    /// Create a new AppConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }
}
