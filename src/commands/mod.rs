use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::app::{AppController, CachedResults, ToolsByCategory};
use crate::domain::metrics::clamp_interval_ms;
use crate::domain::{
    BootstrapResult, DetailedSystemSnapshot, DetectedTool, DomainError, LiveMetrics, ToolCategory,
};

/// Subscriber id used by command-line sessions.
const CLI_SUBSCRIBER: &str = "cli";

/// Get application paths information.
pub fn get_paths(controller: &AppController) -> AppPaths {
    AppPaths {
        data_dir: controller.data_dir(),
        logs_dir: controller.logs_dir(),
        config_path: controller.config_path(),
    }
}

/// Application paths information.
#[derive(Debug, Serialize)]
pub struct AppPaths {
    pub data_dir: String,
    pub logs_dir: String,
    pub config_path: String,
}

// ==================== Tool Commands ====================

/// Registry entry as shown to the user.
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub id: String,
    pub name: String,
    pub category: ToolCategory,
    pub strategy: &'static str,
    pub commands: Vec<String>,
}

/// List every registered tool, optionally restricted to one category.
pub fn list_tools(controller: &AppController, category: Option<ToolCategory>) -> Vec<ToolInfo> {
    let registry = controller.engine().registry();
    let definitions: Vec<_> = match category {
        Some(category) => registry.by_category(category),
        None => registry.all().iter().collect(),
    };

    definitions
        .into_iter()
        .map(|def| ToolInfo {
            id: def.id.clone(),
            name: def.display_name.clone(),
            category: def.category,
            strategy: def.detection.kind().as_str(),
            commands: def.all_commands().map(str::to_string).collect(),
        })
        .collect()
}

/// Detect a single tool by id.
pub async fn scan_tool(controller: &AppController, id: &str) -> Result<DetectedTool, DomainError> {
    controller.engine().scan_tool(id).await
}

/// Detect every tool in one category.
pub async fn scan_category(controller: &AppController, category: ToolCategory) -> Vec<DetectedTool> {
    controller.engine().scan_category(category).await
}

/// Detect every registered tool. `refresh` drops cached results first.
pub async fn scan_all(
    controller: &AppController,
    refresh: bool,
    on_category: Option<&(dyn Fn(ToolCategory, &[DetectedTool]) + Send + Sync)>,
) -> Result<ToolsByCategory, DomainError> {
    if refresh {
        controller.engine().invalidate()?;
    }
    Ok(controller.engine().scan_all_parallel(on_category).await)
}

/// Results of the last scans, without touching the shell.
pub fn get_cached_results(controller: &AppController) -> CachedResults {
    controller.engine().cached_results()
}

/// Forget cached detection results.
pub fn invalidate_cache(controller: &AppController) -> Result<(), DomainError> {
    controller.engine().invalidate()
}

// ==================== Metrics Commands ====================

/// Start the collector and fetch the system snapshot.
pub async fn bootstrap_metrics(controller: &AppController) -> BootstrapResult {
    controller.metrics().bootstrap().await
}

/// Get the structural system snapshot.
pub async fn get_system_snapshot(
    controller: &AppController,
    force_refresh: bool,
) -> Result<DetailedSystemSnapshot, DomainError> {
    controller.metrics().get_snapshot(force_refresh).await
}

/// Stream `samples` live samples, one per interval, to `on_sample`.
pub async fn stream_metrics(
    controller: &AppController,
    interval_ms: u64,
    samples: usize,
    mut on_sample: impl FnMut(&LiveMetrics),
) -> Result<(), DomainError> {
    let bridge = controller.metrics();
    let interval_ms = clamp_interval_ms(interval_ms);
    bridge.subscribe(CLI_SUBSCRIBER, Some(interval_ms)).await?;

    let mut last_version = None;
    let mut delivered = 0;
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    while delivered < samples {
        ticker.tick().await;
        let metrics = bridge.get_live_metrics();
        if last_version == Some(metrics.version) || metrics.version == 0 {
            debug!(version = metrics.version, "No new sample yet");
            if !bridge.is_collector_running() {
                break;
            }
            continue;
        }
        last_version = Some(metrics.version);
        delivered += 1;
        on_sample(&metrics);
    }

    bridge.unsubscribe(CLI_SUBSCRIBER);
    if delivered < samples {
        return Err(DomainError::CollectorExited);
    }
    Ok(())
}

/// Stop the collector before the process exits.
pub async fn shutdown(controller: &AppController) {
    controller.metrics().shutdown().await;
}
