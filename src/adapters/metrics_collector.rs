//! Metrics collector worker.
//!
//! The collector owns a dedicated OS thread with its own single-threaded tokio
//! runtime, so slow telemetry probes never stall the host runtime. The host
//! talks to it over two channels: requests go in, and responses plus
//! unsolicited `metrics`/`error` pushes come out. Every sample is also written
//! to the seqlock buffer, which readers can poll without a round trip.
//!
//! Lifecycle: `idle -> sampling -> stopped`. An interval change restarts the
//! ticker without leaving `sampling`. A `stop` request or a closed request
//! channel ends the worker for good.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle as TaskHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::metrics::clamp_interval_ms;
use crate::domain::{
    AtomicCollectorState, CollectorAction, CollectorMessage, CollectorRequest, CollectorResponse,
    CollectorState, DetailedSystemSnapshot, DomainError, LiveMetrics, MetricsConfig, ProcessCounts,
};
use crate::infrastructure::{metrics_buffer, MetricsBufferReader, MetricsBufferWriter};
use crate::ports::MetricsSource;

const THREAD_NAME: &str = "devscope-metrics";
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Host-side handle to a running collector.
///
/// Dropping the handle closes the request channel, which the worker treats as `stop`.
pub struct CollectorHandle {
    requests: mpsc::UnboundedSender<CollectorRequest>,
    reader: MetricsBufferReader,
    state: Arc<AtomicCollectorState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CollectorHandle {
    /// Queue a request. Fails only when the worker is gone.
    pub fn send(&self, request: CollectorRequest) -> Result<(), DomainError> {
        self.requests
            .send(request)
            .map_err(|_| DomainError::CollectorExited)
    }

    /// Reader for the shared metrics buffer.
    pub fn reader(&self) -> &MetricsBufferReader {
        &self.reader
    }

    pub fn state(&self) -> CollectorState {
        self.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.state().can_sample() && !self.requests.is_closed()
    }

    /// Close the request channel and wait for the worker thread to exit.
    ///
    /// Blocks the calling thread; use from synchronous contexts only.
    pub fn join(self) {
        let thread = self.thread.lock().take();
        drop(self);
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("Metrics collector thread panicked");
            }
        }
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        // The worker exits once it sees the closed channel; a finished thread is reaped here.
        if let Some(thread) = self.thread.lock().take() {
            if thread.is_finished() {
                let _ = thread.join();
            } else {
                debug!("Collector handle dropped, worker thread detached");
            }
        }
    }
}

/// Start a collector for `source`.
///
/// Returns the handle and the receiver for everything the worker sends back.
pub fn spawn_collector(
    source: Box<dyn MetricsSource>,
    config: MetricsConfig,
) -> Result<(CollectorHandle, mpsc::UnboundedReceiver<CollectorMessage>), DomainError> {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    let (writer, reader) = metrics_buffer();
    let state = Arc::new(AtomicCollectorState::new(CollectorState::Idle));

    let worker = Worker {
        source: Arc::from(source),
        interval_ms: clamp_interval_ms(config.default_interval_ms),
        config,
        writer,
        reader: reader.clone(),
        outbound: message_tx,
        state: Arc::clone(&state),
        processes: Arc::new(Mutex::new(None)),
        process_task: None,
        last_process_refresh: None,
        snapshot: None,
        last: None,
    };

    let thread = thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || worker_thread_main(worker, request_rx))
        .map_err(|e| DomainError::Collector(format!("Failed to spawn collector thread: {}", e)))?;

    info!("Metrics collector spawned");

    Ok((
        CollectorHandle {
            requests: request_tx,
            reader,
            state,
            thread: Mutex::new(Some(thread)),
        },
        message_rx,
    ))
}

fn worker_thread_main(worker: Worker, requests: mpsc::UnboundedReceiver<CollectorRequest>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build collector runtime");
            worker.state.store(CollectorState::Stopped);
            let _ = worker.outbound.send(CollectorMessage::Error {
                message: format!("Failed to start collector runtime: {}", e),
            });
            return;
        }
    };

    runtime.block_on(worker.run(requests));
    // Probes that outlived their timeout may still be parked on the blocking pool.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    debug!("Metrics collector thread exiting");
}

fn ticker_at(start: Instant, interval_ms: u64) -> Interval {
    let mut ticker = tokio::time::interval_at(start, Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Run one blocking probe on the blocking pool under `timeout`. Any failure is `None`.
async fn probe<T: Send + 'static>(
    source: &Arc<dyn MetricsSource>,
    timeout: Duration,
    name: &'static str,
    read: fn(&dyn MetricsSource) -> Result<T, DomainError>,
) -> Option<T> {
    let source = Arc::clone(source);
    let task = tokio::task::spawn_blocking(move || read(source.as_ref()));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(value))) => Some(value),
        Ok(Ok(Err(e))) => {
            debug!(probe = name, error = %e, "Probe failed");
            None
        }
        Ok(Err(e)) => {
            warn!(probe = name, error = %e, "Probe task did not complete");
            None
        }
        Err(_) => {
            debug!(probe = name, timeout_ms = timeout.as_millis() as u64, "Probe timed out");
            None
        }
    }
}

struct Worker {
    source: Arc<dyn MetricsSource>,
    config: MetricsConfig,
    interval_ms: u64,
    writer: MetricsBufferWriter,
    reader: MetricsBufferReader,
    outbound: mpsc::UnboundedSender<CollectorMessage>,
    state: Arc<AtomicCollectorState>,
    processes: Arc<Mutex<Option<ProcessCounts>>>,
    process_task: Option<TaskHandle<()>>,
    last_process_refresh: Option<Instant>,
    snapshot: Option<DetailedSystemSnapshot>,
    last: Option<LiveMetrics>,
}

impl Worker {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<CollectorRequest>) {
        if !self
            .state
            .compare_exchange(CollectorState::Idle, CollectorState::Sampling)
        {
            warn!("Collector started from a non-idle state");
            return;
        }
        info!(interval_ms = self.interval_ms, "Sampling started");

        // First tick fires immediately.
        let mut ticker = ticker_at(Instant::now(), self.interval_ms);

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => {
                        if !self.handle(request, &mut ticker).await {
                            break;
                        }
                    }
                    None => {
                        debug!("Request channel closed, stopping collector");
                        break;
                    }
                },
                _ = ticker.tick() => self.sample().await,
            }
        }

        requests.close();
        drop(requests);
        self.stop();
    }

    fn stop(&mut self) {
        self.state.store(CollectorState::Stopped);
        if let Some(task) = self.process_task.take() {
            task.abort();
        }

        let mut last = self.last.take().unwrap_or_default();
        last.running = false;
        self.writer.publish_metrics(&last);
        info!("Sampling stopped");
    }

    /// Handle one request. Returns false when the worker should stop.
    async fn handle(&mut self, request: CollectorRequest, ticker: &mut Interval) -> bool {
        let id = request.id;
        debug!(id, action = %request.action, "Collector request");

        let (response, keep_running) = match request.action {
            CollectorAction::GetLiveMetrics => (self.respond(id, &self.current_metrics()), true),
            CollectorAction::SetInterval => {
                match request.data.as_ref().and_then(Value::as_u64) {
                    Some(requested) => {
                        let interval_ms = self.set_interval(requested, ticker).await;
                        (CollectorResponse::ok(id, json!({ "intervalMs": interval_ms })), true)
                    }
                    None => (
                        CollectorResponse::err(id, "setInterval requires a numeric interval in ms"),
                        true,
                    ),
                }
            }
            CollectorAction::GetSnapshot => (self.snapshot_response(id, false).await, true),
            CollectorAction::RefreshStatic => (self.snapshot_response(id, true).await, true),
            CollectorAction::Stop => (CollectorResponse::ok(id, json!({ "stopped": true })), false),
        };

        if self.outbound.send(CollectorMessage::Response(response)).is_err() {
            debug!(id, "Host went away before the response was sent");
            return false;
        }
        keep_running
    }

    fn respond<T: serde::Serialize>(&self, id: u64, value: &T) -> CollectorResponse {
        match serde_json::to_value(value) {
            Ok(data) => CollectorResponse::ok(id, data),
            Err(e) => CollectorResponse::err(id, format!("Failed to encode response: {}", e)),
        }
    }

    fn current_metrics(&self) -> LiveMetrics {
        self.reader
            .read_metrics()
            .or_else(|| self.last.clone())
            .unwrap_or_default()
    }

    /// Clamp, take an out-of-band sample and restart the ticker.
    async fn set_interval(&mut self, requested: u64, ticker: &mut Interval) -> u64 {
        let interval_ms = clamp_interval_ms(requested);
        if interval_ms != requested {
            debug!(requested, interval_ms, "Sampling interval clamped");
        }
        self.interval_ms = interval_ms;

        let next = Instant::now() + Duration::from_millis(interval_ms);
        self.sample().await;
        *ticker = ticker_at(next, interval_ms);

        info!(interval_ms, "Sampling interval changed");
        interval_ms
    }

    async fn snapshot_response(&mut self, id: u64, force: bool) -> CollectorResponse {
        if !force {
            if let Some(snapshot) = &self.snapshot {
                return self.respond(id, snapshot);
            }
        }

        match probe(
            &self.source,
            self.config.snapshot_timeout(),
            "snapshot",
            |s| s.snapshot(),
        )
        .await
        {
            Some(snapshot) => {
                let response = self.respond(id, &snapshot);
                self.snapshot = Some(snapshot);
                response
            }
            None => CollectorResponse::err(id, "System snapshot unavailable"),
        }
    }

    /// Kick off a background process-count refresh when one is due and none is running.
    fn refresh_processes_if_due(&mut self) {
        let in_flight = self
            .process_task
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        let due = self
            .last_process_refresh
            .map_or(true, |at| at.elapsed() >= self.config.process_refresh());
        if in_flight || !due {
            return;
        }

        self.last_process_refresh = Some(Instant::now());
        let source = Arc::clone(&self.source);
        let slot = Arc::clone(&self.processes);
        let budget = self.config.process_probe_timeout();
        self.process_task = Some(tokio::spawn(async move {
            if let Some(counts) = probe(&source, budget, "processes", |s| s.processes()).await {
                *slot.lock() = Some(counts);
            }
        }));
    }

    async fn sample(&mut self) {
        if !self.state.load().can_sample() {
            return;
        }
        self.refresh_processes_if_due();

        let timeout = self.config.probe_timeout();
        let (cpu, memory, disk, battery) = tokio::join!(
            probe(&self.source, timeout, "cpu", |s| s.cpu()),
            probe(&self.source, timeout, "memory", |s| s.memory()),
            probe(&self.source, timeout, "disk_io", |s| s.disk_io()),
            probe(&self.source, timeout, "battery", |s| s.battery()),
        );

        let processes = *self.processes.lock();
        let failed = cpu.is_none() && memory.is_none();
        let mut metrics =
            LiveMetrics::from_samples(cpu, memory, disk, battery.flatten(), processes, now_ms());
        metrics.has_error = failed;
        metrics.version = self.writer.publish_metrics(&metrics);
        self.last = Some(metrics.clone());

        let _ = self.outbound.send(CollectorMessage::Metrics { data: metrics });
        if failed {
            warn!("CPU and memory probes both failed");
            let _ = self.outbound.send(CollectorMessage::Error {
                message: "CPU and memory probes both failed".to_string(),
            });
        }
    }
}
