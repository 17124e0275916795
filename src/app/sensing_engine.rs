use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adapters::{BatchCandidate, Detectors, UnifiedBatchScanner};
use crate::domain::{
    BatchResults, DetectedTool, DetectionResult, DetectionStrategy, DomainError, EngineConfig,
    ToolCategory, ToolDefinition, ToolRegistry,
};
use crate::ports::ToolCache;

/// Progress of a category scan, reported after each batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanProgress {
    pub category: ToolCategory,
    pub completed: usize,
    pub total: usize,
    pub last_tool: String,
}

pub type ProgressCallback = Arc<dyn Fn(&ScanProgress) + Send + Sync>;

/// Tools grouped by category.
pub type ToolsByCategory = BTreeMap<ToolCategory, Vec<DetectedTool>>;

/// Last persisted scan results, for rendering before any fresh scan completes.
#[derive(Debug, Clone, Serialize)]
pub struct CachedResults {
    pub last_full_scan: Option<DateTime<Utc>>,
    pub categories: ToolsByCategory,
}

/// Orchestrates tool detection across the registry.
pub struct SensingEngine {
    registry: Arc<ToolRegistry>,
    scanner: Arc<UnifiedBatchScanner>,
    detectors: Detectors,
    cache: Arc<dyn ToolCache>,
    listeners: RwLock<Vec<ProgressCallback>>,
    batch_size: usize,
}

impl SensingEngine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        detectors: Detectors,
        cache: Arc<dyn ToolCache>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            scanner: Arc::clone(detectors.scanner()),
            detectors,
            cache,
            listeners: RwLock::new(Vec::new()),
            batch_size: config.category_batch_size.max(1),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Register a listener for category scan progress.
    pub fn on_progress(&self, callback: impl Fn(&ScanProgress) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(callback));
    }

    /// Detect one tool and persist the result.
    pub async fn scan_tool(&self, id: &str) -> Result<DetectedTool, DomainError> {
        let definition = self
            .registry
            .get(id)
            .ok_or_else(|| DomainError::ToolNotFound(id.to_string()))?;
        let tool = self.detect_and_store(definition).await;
        self.persist();
        Ok(tool)
    }

    /// Scan every tool in `category`, in concurrent batches.
    pub async fn scan_category(&self, category: ToolCategory) -> Vec<DetectedTool> {
        let definitions = self.registry.by_category(category);
        let total = definitions.len();
        let mut results = Vec::with_capacity(total);

        for batch in definitions.chunks(self.batch_size) {
            let scanned = join_all(batch.iter().map(|def| self.detect_and_store(def))).await;
            results.extend(scanned);

            if let Some(last) = batch.last() {
                self.emit(&ScanProgress {
                    category,
                    completed: results.len(),
                    total,
                    last_tool: last.display_name.clone(),
                });
            }
        }

        self.persist();
        info!(category = %category, tools = total, "Category scan complete");
        results
    }

    /// Scan the whole registry.
    ///
    /// All CLI tools share one unified batch check; process and custom tools run
    /// their own strategies. Categories complete independently and
    /// `on_category_complete` fires for each as soon as it is done.
    pub async fn scan_all_parallel(
        &self,
        on_category_complete: Option<&(dyn Fn(ToolCategory, &[DetectedTool]) + Send + Sync)>,
    ) -> ToolsByCategory {
        let started = Instant::now();
        let batch = self.scanner.unified_batch_check(&self.cli_candidates()).await;
        let checked_at = Utc::now();

        let scans = self.registry.categories().into_iter().map(|category| {
            let batch = &batch;
            async move {
                let definitions = self.registry.by_category(category);
                let tools = join_all(definitions.into_iter().map(|def| async move {
                    match def.detection {
                        DetectionStrategy::Cli => {
                            let tool = DetectedTool::from_detection(
                                def,
                                cli_result_from_batch(def, batch),
                                checked_at,
                            );
                            self.cache.set_tool(tool.clone());
                            tool
                        }
                        _ => self.detect_and_store(def).await,
                    }
                }))
                .await;

                debug!(category = %category, tools = tools.len(), "Category ready");
                if let Some(callback) = on_category_complete {
                    callback(category, &tools);
                }
                (category, tools)
            }
        });
        let results: ToolsByCategory = join_all(scans).await.into_iter().collect();

        self.cache.mark_scanned();
        self.persist();

        let installed = results.values().flatten().filter(|t| t.installed).count();
        info!(
            tools = self.registry.len(),
            installed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Full scan complete"
        );
        results
    }

    /// Last persisted results grouped by category.
    pub fn cached_results(&self) -> CachedResults {
        let mut categories = ToolsByCategory::new();
        for tool in self.cache.all() {
            categories.entry(tool.category).or_default().push(tool);
        }
        for tools in categories.values_mut() {
            tools.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        }

        CachedResults {
            last_full_scan: self.cache.last_full_scan(),
            categories,
        }
    }

    /// Forget everything both caches know. Call after installing or removing tools.
    pub fn invalidate(&self) -> Result<(), DomainError> {
        self.scanner.invalidate();
        self.cache.invalidate();
        self.cache.save()
    }

    /// Primary and alternate commands of every CLI tool, without duplicates.
    fn cli_candidates(&self) -> Vec<BatchCandidate> {
        let mut seen = HashSet::new();
        self.registry
            .all()
            .iter()
            .filter(|def| matches!(def.detection, DetectionStrategy::Cli))
            .flat_map(|def| {
                let args = def.effective_version_args();
                def.all_commands()
                    .map(move |command| BatchCandidate::new(command, args))
            })
            .filter(|candidate| seen.insert(candidate.command.clone()))
            .collect()
    }

    async fn detect_and_store(&self, definition: &ToolDefinition) -> DetectedTool {
        let result = match self.detectors.detect(definition).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %definition.id, error = %e, "Detection failed");
                DetectionResult::error(e.to_string())
            }
        };

        let tool = DetectedTool::from_detection(definition, result, Utc::now());
        debug!(tool = %tool.id, status = %tool.status, "Tool scanned");
        self.cache.set_tool(tool.clone());
        tool
    }

    fn emit(&self, progress: &ScanProgress) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(progress);
        }
    }

    fn persist(&self) {
        if let Err(e) = self.cache.save() {
            warn!(error = %e, "Failed to persist tool cache");
        }
    }
}

/// Reconstruct a CLI tool's result from the shared batch, honoring command order.
fn cli_result_from_batch(definition: &ToolDefinition, batch: &BatchResults) -> DetectionResult {
    for command in definition.all_commands() {
        if let Some(result) = batch.get(command).filter(|r| r.exists) {
            return DetectionResult::from_batch(command, Some(result));
        }
    }

    match batch
        .get(definition.command.as_str())
        .and_then(|r| r.error.as_deref())
    {
        Some(error) => DetectionResult::not_installed().with_meta("error", error),
        None => DetectionResult::not_installed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::adapters::batch_scanner::NOT_FOUND_SENTINEL;
    use crate::adapters::JsonToolCache;
    use crate::domain::{CustomDetector, ScannerConfig, ToolStatus};
    use crate::infrastructure::TtlCache;
    use crate::ports::ShellExecutor;
    use crate::test_utils::FakeShell;

    fn registry() -> ToolRegistry {
        use ToolCategory::*;
        ToolRegistry::new(vec![
            ToolDefinition::cli("node", "Node.js", Language),
            ToolDefinition::cli("python", "Python", Language)
                .command("python3")
                .alternates(&["python", "py"]),
            ToolDefinition::cli("go", "Go", Language).version_args("version"),
            ToolDefinition::cli("ruby", "Ruby", Language),
            ToolDefinition::cli("php", "PHP", Language),
            ToolDefinition::cli("deno", "Deno", Language),
            ToolDefinition::cli("bun", "Bun", Language),
            ToolDefinition::cli("git", "Git", VersionControl),
            ToolDefinition::cli("docker", "Docker", Container).process(&["dockerd"]),
            ToolDefinition::cli("tpu", "TPU", AiMl)
                .custom(CustomDetector::Unrecognized("tpu-probe".to_string())),
        ])
        .unwrap()
    }

    fn engine(shell: FakeShell, name: &str) -> (SensingEngine, Arc<FakeShell>) {
        let shell = Arc::new(shell);
        let exec: Arc<dyn ShellExecutor> = shell.clone();
        let scanner_config = ScannerConfig::default();
        let scanner = Arc::new(UnifiedBatchScanner::new(
            Arc::clone(&exec),
            Arc::new(TtlCache::new(scanner_config.cache_ttl())),
            scanner_config,
        ));
        let detectors = Detectors::new(exec, scanner, Duration::from_secs(1));
        let path = std::env::temp_dir()
            .join(format!("devscope_engine_{}_{}", name, std::process::id()))
            .join("tool-cache.json");
        let _ = std::fs::remove_file(&path);
        let cache: Arc<dyn ToolCache> = Arc::new(JsonToolCache::open(path));

        let engine = SensingEngine::new(
            Arc::new(registry()),
            detectors,
            cache,
            &EngineConfig::default(),
        );
        (engine, shell)
    }

    fn dev_machine() -> FakeShell {
        FakeShell::new()
            .with_tool("git", "/usr/bin/git", "git version 2.43.0")
            .with_tool("node", "/usr/local/bin/node", "v20.11.1")
            .with_tool("python", "/usr/bin/python", "Python 3.11.8")
            .with_tool("docker", "/usr/bin/docker", "Docker version 24.0.7, build afdd53b")
            .with_process("bash")
    }

    #[tokio::test]
    async fn test_scan_tool_unknown_id() {
        let (engine, _) = engine(dev_machine(), "unknown");
        let err = engine.scan_tool("emacs").await.unwrap_err();
        assert_eq!(err, DomainError::ToolNotFound("emacs".to_string()));
    }

    #[tokio::test]
    async fn test_scan_tool_persists_result() {
        let (engine, _) = engine(dev_machine(), "persist");

        let python = engine.scan_tool("python").await.unwrap();
        assert!(python.installed);
        assert_eq!(python.metadata.get("command").map(String::as_str), Some("python"));

        let cached = engine.cached_results();
        let languages = &cached.categories[&ToolCategory::Language];
        assert_eq!(languages.len(), 1);
        assert_eq!(languages[0].id, "python");
    }

    #[tokio::test]
    async fn test_unknown_detector_yields_error_status() {
        let (engine, _) = engine(dev_machine(), "detector");
        let tpu = engine.scan_tool("tpu").await.unwrap();
        assert_eq!(tpu.status, ToolStatus::Error);
        assert!(!tpu.installed);
        assert!(tpu.description.unwrap().contains("tpu-probe"));
    }

    #[tokio::test]
    async fn test_scan_category_reports_batches() {
        let (engine, _) = engine(dev_machine(), "progress");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.on_progress(move |p| sink.lock().push((p.completed, p.total)));

        let tools = engine.scan_category(ToolCategory::Language).await;
        assert_eq!(tools.len(), 7);
        assert_eq!(*seen.lock(), vec![(5, 7), (7, 7)]);
    }

    #[tokio::test]
    async fn test_scan_all_parallel_shares_one_batch() {
        let (engine, shell) = engine(dev_machine(), "all");
        let completed = AtomicUsize::new(0);
        let callback = |_: ToolCategory, tools: &[DetectedTool]| {
            assert!(!tools.is_empty());
            completed.fetch_add(1, Ordering::SeqCst);
        };

        let results = engine.scan_all_parallel(Some(&callback)).await;

        assert_eq!(completed.load(Ordering::SeqCst), 4);
        assert_eq!(results.len(), 4);
        // Ten CLI commands fit one existence chunk; docker's own CLI probe is separate.
        let existence_calls = shell.count_containing(NOT_FOUND_SENTINEL);
        assert_eq!(existence_calls, 2);

        let git = &results[&ToolCategory::VersionControl][0];
        assert_eq!(git.version.as_deref(), Some("2.43.0"));

        let docker = &results[&ToolCategory::Container][0];
        assert_eq!(docker.status, ToolStatus::Warning);
        assert!(docker.installed);

        let bun = results[&ToolCategory::Language]
            .iter()
            .find(|t| t.id == "bun")
            .unwrap();
        assert_eq!(bun.status, ToolStatus::NotInstalled);

        assert!(engine.cached_results().last_full_scan.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_forces_rescan() {
        let (engine, shell) = engine(dev_machine(), "invalidate");
        engine.scan_all_parallel(None).await;
        let calls = shell.call_count();

        engine.scan_all_parallel(None).await;
        let cached_calls = shell.call_count();
        // The shared batch is cached; only docker's probes run again.
        assert!(cached_calls - calls < calls);

        engine.invalidate().unwrap();
        assert!(engine.cached_results().categories.is_empty());
        engine.scan_all_parallel(None).await;
        assert!(shell.count_containing(NOT_FOUND_SENTINEL) > 3);
    }
}
