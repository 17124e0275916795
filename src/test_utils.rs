//! Scripted doubles for the shell and telemetry ports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adapters::batch_scanner::{DELIMITER, NOT_FOUND_SENTINEL, VERSION_FAILED_SENTINEL};
use crate::domain::metrics::{CpuSnapshot, MemoryLayout, OsSnapshot};
use crate::domain::{
    BatterySample, CpuSample, DetailedSystemSnapshot, DiskIoSample, DomainError, MemorySample,
    ProcessCounts,
};
use crate::ports::{MetricsSource, MetricsSourceFactory, ShellExecutor, ShellOutput};

#[derive(Clone)]
struct FakeTool {
    path: String,
    version_output: Option<String>,
}

/// Shell that understands the batch protocol and answers from a fixed machine description.
#[derive(Default)]
pub struct FakeShell {
    tools: HashMap<String, FakeTool>,
    processes: Vec<String>,
    responses: Vec<(String, ShellOutput)>,
    failure: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, name: &str, path: &str, version_output: &str) -> Self {
        self.tools.insert(
            name.to_string(),
            FakeTool {
                path: path.to_string(),
                version_output: Some(version_output.to_string()),
            },
        );
        self
    }

    pub fn with_tool_no_version(mut self, name: &str, path: &str) -> Self {
        self.tools.insert(
            name.to_string(),
            FakeTool {
                path: path.to_string(),
                version_output: None,
            },
        );
        self
    }

    pub fn with_process(mut self, name: &str) -> Self {
        self.processes.push(name.to_string());
        self
    }

    /// Answer any command containing `pattern` with `stdout`.
    pub fn with_response(mut self, pattern: &str, stdout: &str) -> Self {
        self.responses.push((
            pattern.to_string(),
            ShellOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            },
        ));
        self
    }

    /// Every invocation fails with `reason` on stderr.
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.contains(needle)).count()
    }

    fn answer_batch(&self, command: &str) -> String {
        let separator = format!("echo {DELIMITER}");
        let pieces: Vec<&str> = command.split(separator.as_str()).collect();
        let mut out = String::new();

        for piece in &pieces[..pieces.len().saturating_sub(1)] {
            let piece = piece.trim_start_matches(|c: char| matches!(c, ';' | '&' | '(' | ' '));
            let lookup = piece
                .strip_prefix("command -v ")
                .or_else(|| piece.strip_prefix("where "));

            match lookup {
                Some(rest) => {
                    let name = rest.split_whitespace().next().unwrap_or_default();
                    match self.tools.get(name) {
                        Some(tool) => out.push_str(&tool.path),
                        None => out.push_str(NOT_FOUND_SENTINEL),
                    }
                }
                None => {
                    let name = piece.split_whitespace().next().unwrap_or_default();
                    match self.tools.get(name).and_then(|t| t.version_output.clone()) {
                        Some(version) => out.push_str(&version),
                        None => out.push_str(VERSION_FAILED_SENTINEL),
                    }
                }
            }
            out.push('\n');
            out.push_str(DELIMITER);
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl ShellExecutor for FakeShell {
    async fn exec(&self, command: &str, _timeout: Duration) -> ShellOutput {
        self.calls.lock().push(command.to_string());

        if let Some(reason) = &self.failure {
            return ShellOutput::failed(reason.clone());
        }
        if command.contains(DELIMITER) {
            return ShellOutput {
                stdout: self.answer_batch(command),
                stderr: String::new(),
                exit_code: Some(0),
            };
        }
        if command.starts_with("ps ") || command.starts_with("tasklist") {
            return ShellOutput {
                stdout: self.processes.join("\n"),
                stderr: String::new(),
                exit_code: Some(0),
            };
        }
        if let Some((_, output)) = self.responses.iter().find(|(p, _)| command.contains(p)) {
            return output.clone();
        }
        ShellOutput {
            stdout: String::new(),
            stderr: format!("sh: command not found: {command}"),
            exit_code: Some(127),
        }
    }
}

/// Counters shared by every source a [`FakeMetricsSource`] factory creates.
#[derive(Debug, Default)]
pub struct SourceCounters {
    pub created: AtomicUsize,
    pub cpu_reads: AtomicUsize,
    pub process_reads: AtomicUsize,
    pub snapshots: AtomicUsize,
}

impl SourceCounters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Telemetry source returning fixed values, with optional failures and delays.
#[derive(Clone, Default)]
pub struct FakeMetricsSource {
    pub fail_cpu: bool,
    pub fail_memory: bool,
    pub fail_factory: bool,
    pub battery: Option<BatterySample>,
    pub cpu_delay: Option<Duration>,
    pub snapshot_delay: Option<Duration>,
    pub counters: Arc<SourceCounters>,
}

impl FakeMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> MetricsSourceFactory {
        let template = self.clone();
        Arc::new(move || {
            if template.fail_factory {
                return Err(DomainError::Collector("no telemetry available".to_string()));
            }
            template.counters.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(template.clone()) as Box<dyn MetricsSource>)
        })
    }
}

impl MetricsSource for FakeMetricsSource {
    fn cpu(&self) -> Result<CpuSample, DomainError> {
        self.counters.cpu_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.cpu_delay {
            std::thread::sleep(delay);
        }
        if self.fail_cpu {
            return Err(DomainError::Collector("cpu unavailable".to_string()));
        }
        Ok(CpuSample {
            load_percent: 12.5,
            speed_ghz: Some(3.2),
            temperature_c: None,
        })
    }

    fn memory(&self) -> Result<MemorySample, DomainError> {
        if self.fail_memory {
            return Err(DomainError::Collector("memory unavailable".to_string()));
        }
        Ok(MemorySample {
            total: 16 << 30,
            used: 6 << 30,
            free: 10 << 30,
            available: 9 << 30,
            cached: None,
            swap_total: 2 << 30,
            swap_used: 0,
        })
    }

    fn disk_io(&self) -> Result<DiskIoSample, DomainError> {
        Ok(DiskIoSample {
            read_bytes_per_sec: 1024.0,
            write_bytes_per_sec: 512.0,
        })
    }

    fn battery(&self) -> Result<Option<BatterySample>, DomainError> {
        Ok(self.battery)
    }

    fn processes(&self) -> Result<ProcessCounts, DomainError> {
        self.counters.process_reads.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessCounts {
            all: 300,
            running: 3,
            blocked: 0,
            sleeping: 297,
        })
    }

    fn snapshot(&self) -> Result<DetailedSystemSnapshot, DomainError> {
        self.counters.snapshots.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.snapshot_delay {
            std::thread::sleep(delay);
        }
        Ok(DetailedSystemSnapshot {
            cpu: CpuSnapshot {
                brand: "Fake CPU".to_string(),
                vendor: Some("FakeVendor".to_string()),
                physical_cores: Some(4),
                logical_cores: 8,
                frequency_mhz: 3200,
                arch: "x86_64".to_string(),
            },
            memory: MemoryLayout {
                total: 16 << 30,
                swap_total: 2 << 30,
            },
            disks: Vec::new(),
            os: OsSnapshot {
                name: Some("FakeOS".to_string()),
                ..Default::default()
            },
            battery: None,
            collected_at: chrono::Utc::now().timestamp_millis(),
        })
    }
}
