use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use super::{MetricsBridge, SensingEngine};
use crate::adapters::{
    Detectors, JsonToolCache, SysinfoMetricsSource, SystemShell, TomlConfigStore,
    UnifiedBatchScanner,
};
use crate::domain::{AppConfig, DomainError, ToolRegistry};
use crate::infrastructure::{init_logging, TtlCache};
use crate::ports::{ConfigStore, MetricsSource, MetricsSourceFactory, ShellExecutor, ToolCache};

/// Application controller that wires configuration, logging, the sensing
/// engine and the metrics bridge together.
pub struct AppController {
    config: RwLock<AppConfig>,
    config_store: Arc<TomlConfigStore>,
    engine: Arc<SensingEngine>,
    metrics: MetricsBridge,
    _log_guard: Option<WorkerGuard>,
}

impl AppController {
    /// Initialize from the OS default directories.
    pub fn new() -> Result<Self, DomainError> {
        Self::with_store(TomlConfigStore::new()?, None)
    }

    /// Initialize from `config_store`, optionally overriding the configured log level.
    pub fn with_store(
        config_store: TomlConfigStore,
        log_level: Option<&str>,
    ) -> Result<Self, DomainError> {
        let config_store = Arc::new(config_store);

        let mut config = config_store.load()?;
        if let Some(level) = log_level {
            config.logging.level = level.to_string();
        }

        let log_guard = init_logging(&config_store.logs_dir(), &config.logging)?;
        info!(version = env!("CARGO_PKG_VERSION"), "DevScope starting up");

        let registry = Arc::new(ToolRegistry::with_overrides(config.tools.clone())?);

        let shell: Arc<dyn ShellExecutor> = Arc::new(SystemShell);
        let scanner = Arc::new(UnifiedBatchScanner::new(
            Arc::clone(&shell),
            Arc::new(TtlCache::new(config.scanner.cache_ttl())),
            config.scanner.clone(),
        ));
        let detectors = Detectors::new(shell, scanner, config.engine.probe_timeout());

        let cache_path = config_store.cache_path(&config.engine.cache_file);
        let tool_cache: Arc<dyn ToolCache> = Arc::new(JsonToolCache::open(cache_path));
        let engine = Arc::new(SensingEngine::new(
            Arc::clone(&registry),
            detectors,
            tool_cache,
            &config.engine,
        ));

        let factory: MetricsSourceFactory = Arc::new(|| {
            Ok(Box::new(SysinfoMetricsSource::new()) as Box<dyn MetricsSource>)
        });
        let metrics = MetricsBridge::new(factory, config.metrics.clone());

        info!(
            tools = registry.len(),
            cache_keying = ?config.scanner.cache_keying,
            "AppController initialized"
        );

        Ok(Self {
            config: RwLock::new(config),
            config_store,
            engine,
            metrics,
            _log_guard: log_guard,
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Persist a new configuration. Engine and metrics settings apply on next start.
    pub fn update_config(&self, config: AppConfig) -> Result<(), DomainError> {
        ToolRegistry::with_overrides(config.tools.clone())?;
        self.config_store.save(&config)?;
        *self.config.write() = config;

        info!("Configuration updated");
        Ok(())
    }

    pub fn engine(&self) -> &Arc<SensingEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> &MetricsBridge {
        &self.metrics
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> String {
        self.config_store.data_dir().to_string_lossy().to_string()
    }

    /// Get the logs directory path.
    pub fn logs_dir(&self) -> String {
        self.config_store.logs_dir().to_string_lossy().to_string()
    }

    /// Get the config file path.
    pub fn config_path(&self) -> String {
        self.config_store.config_path().to_string_lossy().to_string()
    }
}
