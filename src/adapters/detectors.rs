use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::batch_scanner::{is_safe_command, BatchCandidate, UnifiedBatchScanner};
use crate::domain::{
    CustomDetector, DetectionResult, DetectionStrategy, DomainError, ToolDefinition, ToolStatus,
};
use crate::ports::ShellExecutor;

static PIP_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Version:\s*(\S+)").expect("pip version regex is valid"));
static PIP_LOCATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Location:\s*(.+?)\s*$").expect("pip location regex is valid"));
static PIP_SUMMARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Summary:\s*(.+?)\s*$").expect("pip summary regex is valid"));

#[cfg(windows)]
const PROCESS_LIST_COMMAND: &str = "tasklist /FO CSV /NH";
#[cfg(not(windows))]
const PROCESS_LIST_COMMAND: &str = "ps -A -o comm=";

/// Linux truncates `comm` to 15 bytes.
const COMM_MAX_LEN: usize = 15;

/// Runs the detection strategy attached to a tool definition.
pub struct Detectors {
    shell: Arc<dyn ShellExecutor>,
    scanner: Arc<UnifiedBatchScanner>,
    probe_timeout: Duration,
}

impl Detectors {
    pub fn new(
        shell: Arc<dyn ShellExecutor>,
        scanner: Arc<UnifiedBatchScanner>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            shell,
            scanner,
            probe_timeout,
        }
    }

    pub fn scanner(&self) -> &Arc<UnifiedBatchScanner> {
        &self.scanner
    }

    /// Detect `definition` with its strategy.
    ///
    /// Errors mean the detection itself could not run; a missing tool is a
    /// successful `not_installed` result.
    pub async fn detect(&self, definition: &ToolDefinition) -> Result<DetectionResult, DomainError> {
        match &definition.detection {
            DetectionStrategy::Cli => self.detect_cli(definition).await,
            DetectionStrategy::Process { process_names } => {
                Ok(self.detect_process(definition, process_names).await)
            }
            DetectionStrategy::Custom(detector) => self.detect_custom(definition, detector).await,
        }
    }

    /// Primary command, then alternates; the first that resolves wins.
    async fn detect_cli(&self, definition: &ToolDefinition) -> Result<DetectionResult, DomainError> {
        let args = definition.effective_version_args();
        let candidates: Vec<BatchCandidate> = definition
            .all_commands()
            .map(|command| BatchCandidate::new(command, args))
            .collect();

        match self.scanner.resolve_first(&candidates).await? {
            Some((command, result)) => {
                debug!(tool = %definition.id, command = %command, "CLI resolved");
                Ok(DetectionResult::from_batch(&command, Some(&result)))
            }
            None => Ok(DetectionResult::not_installed()),
        }
    }

    async fn detect_process(
        &self,
        definition: &ToolDefinition,
        process_names: &[String],
    ) -> DetectionResult {
        let (processes, cli) = tokio::join!(self.running_processes(), self.detect_cli(definition));

        let processes = match processes {
            Ok(processes) => processes,
            Err(e) => {
                warn!(tool = %definition.id, error = %e, "Process listing failed");
                return DetectionResult::unknown().with_meta("error", e.to_string());
            }
        };
        let cli = match cli {
            Ok(cli) => cli,
            Err(e) => {
                warn!(tool = %definition.id, error = %e, "CLI probe failed");
                return DetectionResult::unknown().with_meta("error", e.to_string());
            }
        };

        let running = process_names
            .iter()
            .find(|wanted| processes.iter().any(|p| process_matches(p, wanted)));

        match running {
            Some(name) => {
                let mut result = DetectionResult::healthy(cli.version, cli.path)
                    .with_meta("process", name.as_str())
                    .with_meta("process_running", "true");
                if let Some(command) = cli.metadata.get("command") {
                    result = result.with_meta("command", command.as_str());
                }
                result
            }
            None if cli.installed => {
                let mut result = cli.with_meta("process_running", "false");
                result.status = ToolStatus::Warning;
                result.description = Some(format!(
                    "{} is installed but its background service is not running",
                    definition.display_name
                ));
                result
            }
            None => DetectionResult::not_installed(),
        }
    }

    /// Normalized names of every running process.
    async fn running_processes(&self) -> Result<Vec<String>, DomainError> {
        let output = self.shell.exec(PROCESS_LIST_COMMAND, self.probe_timeout).await;
        if output.is_failure() {
            return Err(DomainError::Detection(format!(
                "Process listing failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(parse_process_list(&output.stdout))
    }

    async fn detect_custom(
        &self,
        definition: &ToolDefinition,
        detector: &CustomDetector,
    ) -> Result<DetectionResult, DomainError> {
        if !is_safe_command(&definition.command) {
            return Err(DomainError::Detection(format!(
                "Invalid command name: {}",
                definition.command
            )));
        }

        let result = match detector {
            CustomDetector::GpuAccelerator => self.detect_gpu(definition).await,
            CustomDetector::PythonPackage { package } => {
                self.detect_python_package(definition, package).await?
            }
            CustomDetector::Unrecognized(name) => {
                return Err(DomainError::UnknownDetector(name.clone()));
            }
        };
        Ok(result.with_meta("detector", detector.name()))
    }

    async fn detect_gpu(&self, definition: &ToolDefinition) -> DetectionResult {
        let command = format!(
            "{} --query-gpu=name,memory.total,driver_version --format=csv,noheader",
            definition.command
        );
        let output = self.shell.exec(&command, self.probe_timeout).await;
        if output.is_failure() {
            debug!(tool = %definition.id, stderr = %output.stderr.trim(), "GPU probe found nothing");
            return probe_miss(&output.stderr);
        }

        match parse_gpu_query(&output.stdout) {
            Some(gpu) => DetectionResult {
                description: Some(gpu.description),
                ..DetectionResult::healthy(gpu.driver_version, None)
            }
            .with_meta("gpu_count", gpu.count.to_string()),
            None => DetectionResult::not_installed(),
        }
    }

    async fn detect_python_package(
        &self,
        definition: &ToolDefinition,
        package: &str,
    ) -> Result<DetectionResult, DomainError> {
        if !is_safe_command(package) {
            return Err(DomainError::Detection(format!(
                "Invalid package name: {}",
                package
            )));
        }

        let command = format!(
            "{} -m pip show {}",
            python_command(&definition.command),
            package
        );
        let output = self.shell.exec(&command, self.probe_timeout).await;
        if output.is_failure() && output.stdout.trim().is_empty() {
            return Ok(probe_miss(&output.stderr));
        }

        Ok(match parse_pip_show(&output.stdout) {
            Some(info) => DetectionResult {
                description: info.summary,
                ..DetectionResult::healthy(Some(info.version), info.location)
            }
            .with_meta("package", package),
            None => DetectionResult::not_installed(),
        })
    }
}

/// A probe that timed out says nothing about installation.
fn probe_miss(stderr: &str) -> DetectionResult {
    if stderr.trim() == "Timeout" {
        DetectionResult::unknown()
    } else {
        DetectionResult::not_installed()
    }
}

#[cfg(windows)]
fn python_command(command: &str) -> &str {
    if command == "python3" {
        "python"
    } else {
        command
    }
}

#[cfg(not(windows))]
fn python_command(command: &str) -> &str {
    command
}

/// Lowercased basename without a `.exe` suffix.
fn normalize_process_name(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('"');
    let base = trimmed
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(trimmed)
        .to_lowercase();
    match base.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => base,
    }
}

/// Parse `ps -o comm=` lines or `tasklist /FO CSV` rows into normalized names.
pub fn parse_process_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let name = if line.starts_with('"') {
                line.split("\",\"").next().unwrap_or(line)
            } else {
                line
            };
            Some(normalize_process_name(name))
        })
        .filter(|name| !name.is_empty())
        .collect()
}

fn process_matches(running: &str, wanted: &str) -> bool {
    let wanted = normalize_process_name(wanted);
    running == wanted || (running.len() == COMM_MAX_LEN && wanted.starts_with(running))
}

#[derive(Debug, PartialEq)]
struct GpuSummary {
    description: String,
    driver_version: Option<String>,
    count: usize,
}

fn parse_gpu_query(stdout: &str) -> Option<GpuSummary> {
    let rows: Vec<Vec<&str>> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.split(',').map(str::trim).collect())
        .collect();

    let first = rows.first()?;
    let name = first.first().filter(|n| !n.is_empty())?;
    let label = match first.get(1).filter(|m| !m.is_empty()) {
        Some(memory) => format!("{} ({})", name, memory),
        None => name.to_string(),
    };
    let description = if rows.len() > 1 {
        format!("{}x {}", rows.len(), label)
    } else {
        label
    };

    Some(GpuSummary {
        description,
        driver_version: first.get(2).filter(|d| !d.is_empty()).map(|d| d.to_string()),
        count: rows.len(),
    })
}

#[derive(Debug, PartialEq)]
struct PipPackage {
    version: String,
    location: Option<String>,
    summary: Option<String>,
}

fn parse_pip_show(stdout: &str) -> Option<PipPackage> {
    let capture = |re: &Regex| {
        re.captures(stdout)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|s| !s.is_empty())
    };
    Some(PipPackage {
        version: capture(&*PIP_VERSION_RE)?,
        location: capture(&*PIP_LOCATION_RE),
        summary: capture(&*PIP_SUMMARY_RE),
    })
}
