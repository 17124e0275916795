use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::{spawn_collector, CollectorHandle};
use crate::domain::metrics::{clamp_interval_ms, METRICS_SCHEMA_VERSION};
use crate::domain::{
    BootstrapResult, CollectorAction, CollectorMessage, CollectorRequest, DetailedSystemSnapshot,
    DomainError, LiveMetrics, MetricsConfig,
};
use crate::infrastructure::PendingRequests;
use crate::ports::MetricsSourceFactory;

struct ActiveCollector {
    generation: u64,
    handle: Arc<CollectorHandle>,
}

struct BridgeInner {
    factory: MetricsSourceFactory,
    config: MetricsConfig,
    collector: Mutex<Option<ActiveCollector>>,
    generation: AtomicU64,
    /// Interval the current collector samples at.
    interval_ms: AtomicU64,
    pending: PendingRequests<Value>,
    subscribers: Mutex<HashSet<String>>,
    latest: RwLock<LiveMetrics>,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
}

/// Host-side facade over the metrics collector.
///
/// Spawns the collector on demand, correlates requests with responses, keeps
/// the last pushed sample, and tears the collector down once the last
/// subscriber has been gone for the idle grace period. All async methods and
/// `unsubscribe` must run inside a tokio runtime.
#[derive(Clone)]
pub struct MetricsBridge {
    inner: Arc<BridgeInner>,
}

impl MetricsBridge {
    pub fn new(factory: MetricsSourceFactory, config: MetricsConfig) -> Self {
        let interval_ms = clamp_interval_ms(config.default_interval_ms);
        Self {
            inner: Arc::new(BridgeInner {
                factory,
                config,
                collector: Mutex::new(None),
                generation: AtomicU64::new(0),
                interval_ms: AtomicU64::new(interval_ms),
                pending: PendingRequests::new(),
                subscribers: Mutex::new(HashSet::new()),
                latest: RwLock::new(LiveMetrics::default()),
                idle_timer: Mutex::new(None),
            }),
        }
    }

    /// Register `subscriber`, starting the collector if needed and cancelling a pending idle shutdown.
    pub async fn subscribe(
        &self,
        subscriber: &str,
        interval_ms: Option<u64>,
    ) -> Result<(), DomainError> {
        self.inner.cancel_idle_timer();
        let count = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.insert(subscriber.to_string());
            subscribers.len()
        };
        info!(subscriber, subscribers = count, "Metrics subscriber added");

        self.inner.ensure_collector()?;
        if let Some(requested) = interval_ms {
            let interval_ms = clamp_interval_ms(requested);
            if self.inner.interval_ms.load(Ordering::SeqCst) != interval_ms {
                self.inner
                    .request(CollectorAction::SetInterval, Some(json!(interval_ms)))
                    .await?;
                self.inner.interval_ms.store(interval_ms, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Remove `subscriber`. The last one out arms the idle shutdown timer.
    pub fn unsubscribe(&self, subscriber: &str) {
        let remaining = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.remove(subscriber);
            subscribers.len()
        };
        info!(subscriber, subscribers = remaining, "Metrics subscriber removed");

        if remaining == 0 {
            BridgeInner::schedule_idle_shutdown(&self.inner);
        }
    }

    /// Last sample pushed by the collector. Never blocks on the worker.
    pub fn get_live_metrics(&self) -> LiveMetrics {
        self.inner.latest.read().clone()
    }

    /// Sample read straight from the collector's shared buffer, if one is running.
    pub fn shared_metrics(&self) -> Option<LiveMetrics> {
        let collector = self.inner.collector.lock();
        collector.as_ref()?.handle.reader().read_metrics()
    }

    /// Structural system description; `force_refresh` bypasses the collector's copy.
    pub async fn get_snapshot(
        &self,
        force_refresh: bool,
    ) -> Result<DetailedSystemSnapshot, DomainError> {
        let action = if force_refresh {
            CollectorAction::RefreshStatic
        } else {
            CollectorAction::GetSnapshot
        };
        let data = self.inner.request(action, None).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Start the collector and fetch the snapshot in one call.
    pub async fn bootstrap(&self) -> BootstrapResult {
        match self.get_snapshot(false).await {
            Ok(snapshot) => BootstrapResult {
                success: true,
                schema_version: METRICS_SCHEMA_VERSION,
                snapshot: Some(snapshot),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "Metrics bootstrap failed");
                BootstrapResult {
                    success: false,
                    schema_version: METRICS_SCHEMA_VERSION,
                    snapshot: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn is_collector_running(&self) -> bool {
        self.inner
            .collector
            .lock()
            .as_ref()
            .is_some_and(|c| c.handle.is_running())
    }

    /// Sampling interval of the current (or next) collector, in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        self.inner.interval_ms.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Drop every subscriber and stop the collector.
    pub async fn shutdown(&self) {
        self.inner.cancel_idle_timer();
        self.inner.subscribers.lock().clear();
        self.inner.stop_collector().await;
    }
}

impl BridgeInner {
    /// Running collector, spawning a fresh one when there is none.
    fn ensure_collector(self: &Arc<Self>) -> Result<Arc<CollectorHandle>, DomainError> {
        let spawned = {
            let mut slot = self.collector.lock();
            if let Some(active) = slot.as_ref() {
                if active.handle.is_running() {
                    return Ok(Arc::clone(&active.handle));
                }
                debug!(generation = active.generation, "Replacing dead collector");
            }

            let (handle, messages) = match (self.factory)()
                .and_then(|source| spawn_collector(source, self.config.clone()))
            {
                Ok(spawned) => spawned,
                Err(e) => {
                    warn!(error = %e, "Failed to start metrics collector");
                    let mut latest = self.latest.write();
                    latest.running = false;
                    latest.has_error = true;
                    return Err(e);
                }
            };

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.interval_ms.store(
                clamp_interval_ms(self.config.default_interval_ms),
                Ordering::SeqCst,
            );
            let handle = Arc::new(handle);
            *slot = Some(ActiveCollector {
                generation,
                handle: Arc::clone(&handle),
            });
            tokio::spawn(pump(Arc::downgrade(self), generation, messages));
            info!(generation, "Metrics collector started");
            handle
        };

        // Collectors started by one-off requests idle out like unsubscribed ones.
        if self.subscribers.lock().is_empty() {
            Self::schedule_idle_shutdown(self);
        }
        Ok(spawned)
    }

    async fn request(
        self: &Arc<Self>,
        action: CollectorAction,
        data: Option<Value>,
    ) -> Result<Value, DomainError> {
        let handle = self.ensure_collector()?;
        let pending = self.pending.register();
        let id = pending.id;

        if let Err(e) = handle.send(CollectorRequest { id, action, data }) {
            self.pending.cancel(id);
            return Err(e);
        }
        self.pending
            .wait(pending, self.config.request_timeout(), action.as_str())
            .await
    }

    async fn stop_collector(&self) {
        let Some(active) = self.collector.lock().take() else {
            return;
        };
        self.latest.write().running = false;

        let pending = self.pending.register();
        let stop = CollectorRequest {
            id: pending.id,
            action: CollectorAction::Stop,
            data: None,
        };
        if active.handle.send(stop).is_ok() {
            if let Err(e) = self
                .pending
                .wait(pending, self.config.request_timeout(), CollectorAction::Stop.as_str())
                .await
            {
                debug!(error = %e, "Collector did not acknowledge stop");
            }
        } else {
            self.pending.cancel(pending.id);
        }

        let rejected = self.pending.reject_all(|| DomainError::CollectorExited);
        info!(generation = active.generation, rejected, "Metrics collector stopped");
    }

    fn cancel_idle_timer(&self) {
        if let Some(timer) = self.idle_timer.lock().take() {
            timer.abort();
            debug!("Idle shutdown cancelled");
        }
    }

    fn schedule_idle_shutdown(this: &Arc<Self>) {
        let grace = this.config.idle_shutdown();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // No runtime to wait on; tear down right away.
            if let Some(active) = this.collector.lock().take() {
                debug!(generation = active.generation, "Collector dropped without a runtime");
            }
            this.latest.write().running = false;
            return;
        };

        let weak = Arc::downgrade(this);
        let timer = runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.subscribers.lock().is_empty() {
                info!(grace_ms = grace.as_millis() as u64, "No subscribers, stopping collector");
                inner.stop_collector().await;
            }
        });

        if let Some(previous) = this.idle_timer.lock().replace(timer) {
            previous.abort();
        }
        debug!(grace_ms = grace.as_millis() as u64, "Idle shutdown scheduled");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.collector
            .lock()
            .as_ref()
            .is_some_and(|c| c.generation == generation)
    }

    fn on_message(&self, generation: u64, message: CollectorMessage) {
        match message {
            CollectorMessage::Metrics { data } => {
                if self.is_current(generation) {
                    *self.latest.write() = data;
                }
            }
            CollectorMessage::Response(response) => {
                let result = if response.success {
                    Ok(response.data.unwrap_or(Value::Null))
                } else {
                    Err(DomainError::Collector(
                        response
                            .error
                            .unwrap_or_else(|| "Collector request failed".to_string()),
                    ))
                };
                self.pending.resolve(response.id, result);
            }
            CollectorMessage::Error { message } => {
                warn!(generation, message = %message, "Collector reported an error");
                if self.is_current(generation) {
                    self.latest.write().has_error = true;
                }
            }
            CollectorMessage::Request(request) => {
                warn!(generation, id = request.id, "Collector sent a request, ignoring");
                self.latest.write().has_error = true;
            }
        }
    }

    /// The message channel closed. Only an exit the bridge did not ask for is an error.
    fn on_exit(&self, generation: u64) {
        let unexpected = {
            let mut slot = self.collector.lock();
            if slot.as_ref().is_some_and(|c| c.generation == generation) {
                slot.take();
                true
            } else {
                false
            }
        };
        if !unexpected {
            debug!(generation, "Collector exited after stop");
            return;
        }

        let rejected = self.pending.reject_all(|| DomainError::CollectorExited);
        let mut latest = self.latest.write();
        latest.running = false;
        latest.has_error = true;
        warn!(generation, rejected, "Metrics collector exited unexpectedly");
    }
}

/// Forward collector messages to the bridge until the collector goes away.
async fn pump(
    inner: Weak<BridgeInner>,
    generation: u64,
    mut messages: mpsc::UnboundedReceiver<CollectorMessage>,
) {
    while let Some(message) = messages.recv().await {
        let Some(bridge) = inner.upgrade() else {
            return;
        };
        bridge.on_message(generation, message);
    }
    if let Some(bridge) = inner.upgrade() {
        bridge.on_exit(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::test_utils::{FakeMetricsSource, SourceCounters};

    fn config() -> MetricsConfig {
        MetricsConfig {
            idle_shutdown_ms: 300,
            request_timeout_ms: 2_000,
            ..Default::default()
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_subscribe_starts_sampling() {
        let source = FakeMetricsSource::new();
        let bridge = MetricsBridge::new(source.factory(), config());

        bridge.subscribe("dashboard", None).await.unwrap();
        assert!(bridge.is_collector_running());
        assert_eq!(bridge.subscriber_count(), 1);

        assert!(wait_for(|| bridge.get_live_metrics().running).await);
        let live = bridge.get_live_metrics();
        assert_eq!(live.cpu_load, Some(12.5));
        assert!(live.version >= 1);

        let shared = bridge.shared_metrics().unwrap();
        assert!(shared.running);

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_idle_shutdown_after_grace() {
        let source = FakeMetricsSource::new();
        let counters = Arc::clone(&source.counters);
        let bridge = MetricsBridge::new(source.factory(), config());

        bridge.subscribe("a", None).await.unwrap();
        bridge.unsubscribe("a");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bridge.is_collector_running());

        assert!(wait_for(|| !bridge.is_collector_running()).await);
        assert!(!bridge.get_live_metrics().running);
        assert!(!bridge.get_live_metrics().has_error);
        assert_eq!(SourceCounters::get(&counters.created), 1);
    }

    #[tokio::test]
    async fn test_resubscribe_in_grace_keeps_collector() {
        let source = FakeMetricsSource::new();
        let counters = Arc::clone(&source.counters);
        let bridge = MetricsBridge::new(source.factory(), config());

        bridge.subscribe("a", None).await.unwrap();
        bridge.unsubscribe("a");
        tokio::time::sleep(Duration::from_millis(100)).await;
        bridge.subscribe("a", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(bridge.is_collector_running());
        assert_eq!(SourceCounters::get(&counters.created), 1);

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribe_with_interval() {
        let bridge = MetricsBridge::new(FakeMetricsSource::new().factory(), config());
        bridge.subscribe("fast", Some(100)).await.unwrap();
        assert!(bridge.is_collector_running());
        bridge.shutdown().await;
        assert!(!bridge.is_collector_running());
        assert_eq!(bridge.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_same_interval_does_not_resample() {
        let source = FakeMetricsSource::new();
        let counters = Arc::clone(&source.counters);
        let bridge = MetricsBridge::new(source.factory(), config());

        bridge.subscribe("a", Some(2_000)).await.unwrap();
        assert!(wait_for(|| bridge.get_live_metrics().version >= 1).await);
        let before = SourceCounters::get(&counters.cpu_reads);

        for subscriber in ["b", "c", "d", "e", "f"] {
            bridge.subscribe(subscriber, Some(2_000)).await.unwrap();
        }
        assert_eq!(SourceCounters::get(&counters.cpu_reads), before);
        assert_eq!(bridge.interval_ms(), 2_000);

        bridge.subscribe("g", Some(750)).await.unwrap();
        assert!(SourceCounters::get(&counters.cpu_reads) > before);
        assert_eq!(bridge.interval_ms(), 750);

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_and_force_refresh() {
        let source = FakeMetricsSource::new();
        let counters = Arc::clone(&source.counters);
        let bridge = MetricsBridge::new(source.factory(), config());

        let snapshot = bridge.get_snapshot(false).await.unwrap();
        assert_eq!(snapshot.cpu.logical_cores, 8);
        bridge.get_snapshot(false).await.unwrap();
        bridge.get_snapshot(true).await.unwrap();
        assert_eq!(SourceCounters::get(&counters.snapshots), 2);

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_bootstrap_reports_schema() {
        let bridge = MetricsBridge::new(FakeMetricsSource::new().factory(), config());
        let result = bridge.bootstrap().await;
        assert!(result.success);
        assert_eq!(result.schema_version, METRICS_SCHEMA_VERSION);
        assert!(result.snapshot.is_some());
        assert!(result.error.is_none());
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_failure_sets_error() {
        let source = FakeMetricsSource {
            fail_factory: true,
            ..Default::default()
        };
        let bridge = MetricsBridge::new(source.factory(), config());

        let result = bridge.bootstrap().await;
        assert!(!result.success);
        assert!(result.error.is_some());
        assert!(bridge.get_live_metrics().has_error);
        assert!(!bridge.is_collector_running());

        assert!(bridge.subscribe("a", None).await.is_err());
    }

    #[tokio::test]
    async fn test_slow_request_times_out() {
        let source = FakeMetricsSource {
            snapshot_delay: Some(Duration::from_millis(800)),
            ..Default::default()
        };
        let config = MetricsConfig {
            request_timeout_ms: 200,
            ..config()
        };
        let bridge = MetricsBridge::new(source.factory(), config);

        let err = bridge.get_snapshot(false).await.unwrap_err();
        assert!(matches!(err, DomainError::CollectorTimeout { .. }));
        bridge.shutdown().await;
    }
}
