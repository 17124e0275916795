use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::domain::tool::DEFAULT_VERSION_ARGS;
use crate::domain::{BatchResults, BatchToolResult, CacheKeying, DomainError, ScannerConfig};
use crate::infrastructure::TtlCache;
use crate::ports::{ShellExecutor, ShellOutput};

/// Line emitted after every tool's section in a batch invocation.
pub const DELIMITER: &str = "__DEVSCOPE_DELIM__";
/// Printed when the which-equivalent fails.
pub const NOT_FOUND_SENTINEL: &str = "__DEVSCOPE_NOT_FOUND__";
/// Printed when a version command exits non-zero.
pub const VERSION_FAILED_SENTINEL: &str = "__DEVSCOPE_VERSION_FAILED__";

const GLOBAL_CACHE_KEY: &str = "unified-batch";
const OPAQUE_VERSION_CHARS: usize = 30;

static SEMVER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"v?(\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.-]+)?)").expect("semver regex is valid")
});
static LABELED_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)version[:\s]+v?(\d+(?:\.\d+)+)").expect("labeled version regex is valid")
});
static BARE_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)+)").expect("bare version regex is valid"));

/// One command to check, with the arguments that make it print its version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchCandidate {
    pub command: String,
    pub version_args: String,
}

impl BatchCandidate {
    pub fn new(command: impl Into<String>, version_args: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            version_args: version_args.into(),
        }
    }

    /// Candidate using `--version`.
    pub fn command(command: impl Into<String>) -> Self {
        Self::new(command, DEFAULT_VERSION_ARGS)
    }
}

/// Command names are interpolated into a shell string, so only plain names pass.
pub(crate) fn is_safe_command(command: &str) -> bool {
    !command.is_empty()
        && command
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
}

fn is_safe_args(args: &str) -> bool {
    args.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '+' | '-' | '='))
}

#[cfg(windows)]
fn existence_segment(command: &str) -> String {
    format!("(where {command} 2>nul || echo {NOT_FOUND_SENTINEL}) & echo {DELIMITER}")
}

#[cfg(not(windows))]
fn existence_segment(command: &str) -> String {
    format!("command -v {command} 2>/dev/null || echo {NOT_FOUND_SENTINEL}; echo {DELIMITER}")
}

#[cfg(windows)]
fn version_segment(command: &str, args: &str) -> String {
    format!("({command} {args} 2>&1 || echo {VERSION_FAILED_SENTINEL}) & echo {DELIMITER}")
}

#[cfg(not(windows))]
fn version_segment(command: &str, args: &str) -> String {
    format!(
        "{command} {args} </dev/null 2>&1 || echo {VERSION_FAILED_SENTINEL}; echo {DELIMITER}"
    )
}

#[cfg(windows)]
const SEGMENT_JOIN: &str = " & ";
#[cfg(not(windows))]
const SEGMENT_JOIN: &str = "; ";

/// Build the single shell command that checks existence of every tool in `chunk`.
pub fn build_existence_command(chunk: &[BatchCandidate]) -> String {
    chunk
        .iter()
        .map(|c| existence_segment(&c.command))
        .collect::<Vec<_>>()
        .join(SEGMENT_JOIN)
}

/// Build the single shell command that queries the version of every tool in `chunk`.
pub fn build_version_command(chunk: &[BatchCandidate]) -> String {
    chunk
        .iter()
        .map(|c| version_segment(&c.command, &c.version_args))
        .collect::<Vec<_>>()
        .join(SEGMENT_JOIN)
}

/// Split batch output into per-tool sections on the delimiter.
///
/// The delimiter may share a line with output that lacks a trailing newline.
/// Text after the last delimiter belongs to no tool and is dropped.
pub fn split_sections(stdout: &str) -> Vec<String> {
    let mut sections: Vec<String> = stdout.split(DELIMITER).map(str::to_string).collect();
    sections.pop();
    sections
}

fn first_non_blank_line(section: &str) -> Option<&str> {
    section.lines().map(str::trim).find(|l| !l.is_empty())
}

/// Interpret existence output for `chunk`. A failed invocation marks the whole chunk missing.
pub fn parse_existence(
    chunk: &[BatchCandidate],
    output: &ShellOutput,
) -> Vec<(String, BatchToolResult)> {
    if output.is_failure() {
        let reason = output.stderr.trim().to_string();
        return chunk
            .iter()
            .map(|c| (c.command.clone(), BatchToolResult::failed(reason.clone())))
            .collect();
    }

    let sections = split_sections(&output.stdout);
    chunk
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let result = match sections.get(i).map(String::as_str) {
                Some(section) if !section.contains(NOT_FOUND_SENTINEL) => {
                    match first_non_blank_line(section) {
                        Some(path) => BatchToolResult::found(Some(path.to_string()), None),
                        None => BatchToolResult::not_found(),
                    }
                }
                _ => BatchToolResult::not_found(),
            };
            (c.command.clone(), result)
        })
        .collect()
}

/// Interpret version output for `chunk`; tools without a readable version map to `None`.
pub fn parse_versions(
    chunk: &[BatchCandidate],
    output: &ShellOutput,
) -> Vec<(String, Option<String>)> {
    if output.is_failure() {
        return chunk.iter().map(|c| (c.command.clone(), None)).collect();
    }

    let sections = split_sections(&output.stdout);
    chunk
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let version = sections.get(i).and_then(|s| parse_version_section(s));
            (c.command.clone(), version)
        })
        .collect()
}

fn parse_version_section(section: &str) -> Option<String> {
    if section.contains(VERSION_FAILED_SENTINEL) {
        return None;
    }
    first_non_blank_line(section).map(extract_version)
}

/// Pull a version out of a tool's first output line.
///
/// Tries a semver-like pattern, then a `version: x.y` label, then any dotted
/// number; otherwise returns the start of the line verbatim.
pub fn extract_version(line: &str) -> String {
    for re in [&*SEMVER_RE, &*LABELED_VERSION_RE, &*BARE_VERSION_RE] {
        if let Some(m) = re.captures(line).and_then(|caps| caps.get(1)) {
            return m.as_str().to_string();
        }
    }
    line.chars().take(OPAQUE_VERSION_CHARS).collect()
}

/// Detects many commands with a constant number of shell invocations per phase.
pub struct UnifiedBatchScanner {
    shell: Arc<dyn ShellExecutor>,
    cache: Arc<TtlCache<BatchResults>>,
    config: ScannerConfig,
}

impl UnifiedBatchScanner {
    pub fn new(
        shell: Arc<dyn ShellExecutor>,
        cache: Arc<TtlCache<BatchResults>>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            shell,
            cache,
            config,
        }
    }

    /// Existence and version for every candidate, served from the cache when fresh.
    ///
    /// Always returns one entry per distinct input command.
    pub async fn unified_batch_check(&self, candidates: &[BatchCandidate]) -> BatchResults {
        let key = self.cache_key(candidates);
        if let Some(hit) = self.cache.get(&key) {
            debug!(entries = hit.len(), "Batch scan served from cache");
            return hit;
        }

        let (results, complete) = self.scan(candidates).await;
        if complete {
            self.cache.insert(&key, results.clone());
        }
        results
    }

    /// First candidate (in order) that exists, with its version.
    ///
    /// Existence is checked for all candidates in one invocation; only the hit
    /// gets a version query.
    pub async fn resolve_first(
        &self,
        candidates: &[BatchCandidate],
    ) -> Result<Option<(String, BatchToolResult)>, DomainError> {
        let valid: Vec<BatchCandidate> = candidates
            .iter()
            .filter(|c| is_safe_command(&c.command))
            .cloned()
            .collect();

        let mut existence = BatchResults::new();
        self.existence_phase(&valid, &mut existence).await?;

        let Some(hit) = valid
            .iter()
            .find(|c| existence.get(&c.command).is_some_and(|r| r.exists))
        else {
            return Ok(None);
        };

        let mut versions = HashMap::new();
        self.version_phase(std::slice::from_ref(hit), &mut versions)
            .await?;

        let result = existence
            .remove(&hit.command)
            .unwrap_or_else(BatchToolResult::not_found)
            .with_version(versions.remove(&hit.command).flatten());
        Ok(Some((hit.command.clone(), result)))
    }

    /// Drop every cached batch result.
    pub fn invalidate(&self) {
        self.cache.clear();
        info!("Batch scan cache invalidated");
    }

    pub fn cache_key(&self, candidates: &[BatchCandidate]) -> String {
        match self.config.cache_keying {
            CacheKeying::Global => GLOBAL_CACHE_KEY.to_string(),
            CacheKeying::InputList => {
                let mut parts: Vec<String> = candidates
                    .iter()
                    .map(|c| format!("{}|{}", c.command, c.version_args))
                    .collect();
                parts.sort();
                parts.dedup();
                format!("batch:{}", parts.join(","))
            }
        }
    }

    async fn scan(&self, candidates: &[BatchCandidate]) -> (BatchResults, bool) {
        let started = Instant::now();
        let mut results = BatchResults::new();

        let mut seen = HashSet::new();
        let mut valid = Vec::new();
        for candidate in candidates {
            if !seen.insert(candidate.command.as_str()) {
                continue;
            }
            if is_safe_command(&candidate.command) {
                let mut candidate = candidate.clone();
                if !is_safe_args(&candidate.version_args) {
                    warn!(command = %candidate.command, "Ignoring unsafe version arguments");
                    candidate.version_args = DEFAULT_VERSION_ARGS.to_string();
                }
                valid.push(candidate);
            } else {
                warn!(command = %candidate.command, "Refusing to probe invalid command name");
                results.insert(
                    candidate.command.clone(),
                    BatchToolResult::failed("Invalid command name"),
                );
            }
        }

        let mut complete = true;

        if let Err(e) = self.existence_phase(&valid, &mut results).await {
            warn!(error = %e, "Existence phase failed");
            complete = false;
        } else {
            let present: Vec<BatchCandidate> = valid
                .iter()
                .filter(|c| results.get(&c.command).is_some_and(|r| r.exists))
                .cloned()
                .collect();

            let mut versions = HashMap::new();
            let outcome = self.version_phase(&present, &mut versions).await;
            for (command, version) in versions {
                if let Some(entry) = results.remove(&command) {
                    results.insert(command, entry.with_version(version));
                }
            }
            if let Err(e) = outcome {
                warn!(error = %e, "Version phase failed");
                complete = false;
            }
        }

        if !complete {
            for candidate in candidates {
                results
                    .entry(candidate.command.clone())
                    .or_insert_with(|| BatchToolResult::failed("Scan failed"));
            }
        }

        info!(
            requested = candidates.len(),
            found = results.values().filter(|r| r.exists).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            complete,
            "Batch scan finished"
        );

        (results, complete)
    }

    async fn existence_phase(
        &self,
        candidates: &[BatchCandidate],
        results: &mut BatchResults,
    ) -> Result<(), DomainError> {
        let timeout = self.config.existence_timeout();
        let chunks = candidates.chunks(self.config.existence_chunk_size.max(1));
        let mut tasks = JoinSet::new();

        for chunk in chunks {
            let shell = Arc::clone(&self.shell);
            let chunk = chunk.to_vec();
            tasks.spawn(async move {
                let output = shell.exec(&build_existence_command(&chunk), timeout).await;
                if output.is_failure() {
                    warn!(tools = chunk.len(), stderr = %output.stderr.trim(), "Existence batch failed");
                }
                parse_existence(&chunk, &output)
            });
        }

        collect_chunks(&mut tasks, "existence", |(command, result)| {
            results.insert(command, result);
        })
        .await
    }

    async fn version_phase(
        &self,
        candidates: &[BatchCandidate],
        versions: &mut HashMap<String, Option<String>>,
    ) -> Result<(), DomainError> {
        let timeout: Duration = self.config.version_timeout();
        let chunks = candidates.chunks(self.config.version_chunk_size.max(1));
        let mut tasks = JoinSet::new();

        for chunk in chunks {
            let shell = Arc::clone(&self.shell);
            let chunk = chunk.to_vec();
            tasks.spawn(async move {
                let output = shell.exec(&build_version_command(&chunk), timeout).await;
                if output.is_failure() {
                    warn!(tools = chunk.len(), stderr = %output.stderr.trim(), "Version batch failed");
                }
                parse_versions(&chunk, &output)
            });
        }

        collect_chunks(&mut tasks, "version", |(command, version)| {
            versions.insert(command, version);
        })
        .await
    }
}

/// Drain chunk tasks, feeding every parsed entry to `sink`. Entries from chunks
/// that finished before a failure are kept.
async fn collect_chunks<T: Send + 'static>(
    tasks: &mut JoinSet<Vec<T>>,
    phase: &str,
    mut sink: impl FnMut(T),
) -> Result<(), DomainError> {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(entries) => entries.into_iter().for_each(&mut sink),
            Err(e) => {
                tasks.abort_all();
                return Err(DomainError::Detection(format!(
                    "{} chunk did not complete: {}",
                    phase, e
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeShell;

    fn scanner(shell: Arc<FakeShell>, config: ScannerConfig) -> UnifiedBatchScanner {
        let cache = Arc::new(TtlCache::new(config.cache_ttl()));
        UnifiedBatchScanner::new(shell, cache, config)
    }

    fn candidates(names: &[&str]) -> Vec<BatchCandidate> {
        names.iter().map(|n| BatchCandidate::command(*n)).collect()
    }

    fn dev_machine() -> Arc<FakeShell> {
        Arc::new(
            FakeShell::new()
                .with_tool("git", "/usr/bin/git", "git version 2.43.0")
                .with_tool("node", "/usr/local/bin/node", "v20.11.1"),
        )
    }

    #[test]
    fn test_extract_version_patterns() {
        assert_eq!(extract_version("git version 2.43.0"), "2.43.0");
        assert_eq!(extract_version("v20.11.1"), "20.11.1");
        assert_eq!(extract_version("go version go1.22.1 linux/amd64"), "1.22.1");
        assert_eq!(extract_version("openjdk version \"17.0.2\" 2022-01-18"), "17.0.2");
        assert_eq!(extract_version("rustc 1.77.2 (25ef9e3d8 2024-04-09)"), "1.77.2");
        assert_eq!(extract_version("Terraform Version: 1.7"), "1.7");
        assert_eq!(extract_version("GNU Make 4.3"), "4.3");
        assert_eq!(extract_version("1.0.0-beta.2 build"), "1.0.0-beta.2");
    }

    #[test]
    fn test_extract_version_falls_back_to_prefix() {
        let line = "no digits in this rather long banner line at all";
        let version = extract_version(line);
        assert_eq!(version.chars().count(), 30);
        assert!(line.starts_with(&version));
    }

    #[test]
    fn test_split_sections_drops_trailing_text() {
        let out = format!("/usr/bin/git\n{DELIMITER}\n\n{DELIMITER}\ntrailing");
        let sections = split_sections(&out);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].trim(), "/usr/bin/git");
        assert!(sections[1].trim().is_empty());
    }

    #[test]
    fn test_version_without_trailing_newline_keeps_alignment() {
        let chunk = candidates(&["nonl", "good", "last"]);
        let output = ShellOutput {
            stdout: format!("nonl 1.2.3{DELIMITER}\ngood 4.5.6\n{DELIMITER}\nlast v0.9.1{DELIMITER}"),
            ..Default::default()
        };
        let parsed: HashMap<_, _> = parse_versions(&chunk, &output).into_iter().collect();
        assert_eq!(parsed["nonl"].as_deref(), Some("1.2.3"));
        assert_eq!(parsed["good"].as_deref(), Some("4.5.6"));
        assert_eq!(parsed["last"].as_deref(), Some("0.9.1"));
    }

    #[test]
    fn test_parse_existence_sections() {
        let chunk = candidates(&["git", "nope", "empty", "missing-section"]);
        let output = ShellOutput {
            stdout: format!(
                "/usr/bin/git\n/opt/git\n{DELIMITER}\n{NOT_FOUND_SENTINEL}\n{DELIMITER}\n  \n{DELIMITER}\n"
            ),
            ..Default::default()
        };

        let parsed: HashMap<_, _> = parse_existence(&chunk, &output).into_iter().collect();
        assert_eq!(parsed["git"].path.as_deref(), Some("/usr/bin/git"));
        assert!(parsed["git"].exists);
        assert!(!parsed["nope"].exists);
        assert!(!parsed["empty"].exists);
        assert!(!parsed["missing-section"].exists);
    }

    #[test]
    fn test_parse_existence_failed_batch() {
        let chunk = candidates(&["git", "node"]);
        let parsed = parse_existence(&chunk, &ShellOutput::failed("Timeout"));
        assert!(parsed.iter().all(|(_, r)| !r.exists && r.error.as_deref() == Some("Timeout")));
    }

    #[test]
    fn test_parse_version_failure_sentinel() {
        let chunk = candidates(&["java", "git"]);
        let output = ShellOutput {
            stdout: format!(
                "Unrecognized option\n{VERSION_FAILED_SENTINEL}\n{DELIMITER}\ngit version 2.43.0\n{DELIMITER}\n"
            ),
            ..Default::default()
        };
        let parsed: HashMap<_, _> = parse_versions(&chunk, &output).into_iter().collect();
        assert_eq!(parsed["java"], None);
        assert_eq!(parsed["git"].as_deref(), Some("2.43.0"));
    }

    #[tokio::test]
    async fn test_scenario_git_node_missing() {
        let shell = dev_machine();
        let scanner = scanner(Arc::clone(&shell), ScannerConfig::default());

        let results = scanner
            .unified_batch_check(&candidates(&["git", "node", "doesnotexist123"]))
            .await;

        assert_eq!(results.len(), 3);
        assert!(results["git"].exists);
        assert_eq!(results["git"].version.as_deref(), Some("2.43.0"));
        assert!(results["node"].exists);
        assert_eq!(results["node"].version.as_deref(), Some("20.11.1"));
        let missing = &results["doesnotexist123"];
        assert!(!missing.exists);
        assert!(missing.version.is_none());
        assert!(missing.path.is_none());

        // One existence call, one version call for the two found tools.
        assert_eq!(shell.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_issues_no_shell_calls() {
        let shell = dev_machine();
        let scanner = scanner(Arc::clone(&shell), ScannerConfig::default());
        let input = candidates(&["git", "node", "doesnotexist123"]);

        let first = scanner.unified_batch_check(&input).await;
        let calls_after_first = shell.call_count();
        let second = scanner.unified_batch_check(&input).await;

        assert_eq!(shell.call_count(), calls_after_first);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_input_keyed_cache_separates_lists() {
        let shell = dev_machine();
        let scanner = scanner(Arc::clone(&shell), ScannerConfig::default());

        scanner.unified_batch_check(&candidates(&["git"])).await;
        let other = scanner.unified_batch_check(&candidates(&["node"])).await;

        assert!(other.contains_key("node"));
        assert!(!other.contains_key("git"));
    }

    #[tokio::test]
    async fn test_global_cache_key_serves_first_list() {
        let shell = dev_machine();
        let config = ScannerConfig {
            cache_keying: CacheKeying::Global,
            ..Default::default()
        };
        let scanner = scanner(Arc::clone(&shell), config);

        scanner.unified_batch_check(&candidates(&["git"])).await;
        let calls = shell.call_count();
        let other = scanner.unified_batch_check(&candidates(&["node"])).await;

        assert_eq!(shell.call_count(), calls);
        assert!(other.contains_key("git"));
        assert!(!other.contains_key("node"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_rescan() {
        let shell = dev_machine();
        let scanner = scanner(Arc::clone(&shell), ScannerConfig::default());
        let input = candidates(&["git"]);

        scanner.unified_batch_check(&input).await;
        let calls = shell.call_count();
        scanner.invalidate();
        scanner.unified_batch_check(&input).await;

        assert!(shell.call_count() > calls);
    }

    #[tokio::test]
    async fn test_chunking_and_completeness() {
        let mut fake = FakeShell::new();
        let names: Vec<String> = (0..45).map(|i| format!("tool{i}")).collect();
        for name in names.iter().step_by(3) {
            fake = fake.with_tool(name, &format!("/bin/{name}"), "1.2.3");
        }
        let shell = Arc::new(fake);
        let scanner = scanner(Arc::clone(&shell), ScannerConfig::default());

        let mut input: Vec<BatchCandidate> = names.iter().map(BatchCandidate::command).collect();
        input.push(BatchCandidate::command("rm -rf /"));
        let results = scanner.unified_batch_check(&input).await;

        assert_eq!(results.len(), 46);
        assert_eq!(results.values().filter(|r| r.exists).count(), 15);
        assert_eq!(
            results["rm -rf /"].error.as_deref(),
            Some("Invalid command name")
        );
        // 45 tools in chunks of 20, 15 found tools in chunks of 10.
        assert_eq!(shell.count_containing(NOT_FOUND_SENTINEL), 3);
        assert_eq!(shell.count_containing(VERSION_FAILED_SENTINEL), 2);

        for result in results.values() {
            if result.version.is_some() {
                assert!(result.exists);
            }
        }
    }

    #[tokio::test]
    async fn test_failed_shell_marks_everything_missing() {
        let shell = Arc::new(FakeShell::new().failing("spawn failed"));
        let scanner = scanner(Arc::clone(&shell), ScannerConfig::default());
        let input = candidates(&["git", "node"]);

        let results = scanner.unified_batch_check(&input).await;
        assert_eq!(results.len(), 2);
        assert!(results.values().all(|r| !r.exists && r.version.is_none()));

        // A failed existence batch still counts as a completed scan.
        let calls = shell.call_count();
        scanner.unified_batch_check(&input).await;
        assert_eq!(shell.call_count(), calls);
    }

    #[tokio::test]
    async fn test_found_without_version() {
        let shell = Arc::new(FakeShell::new().with_tool_no_version("weird", "/usr/bin/weird"));
        let scanner = scanner(shell, ScannerConfig::default());

        let results = scanner.unified_batch_check(&candidates(&["weird"])).await;
        assert!(results["weird"].exists);
        assert!(results["weird"].version.is_none());
        assert!(results["weird"].error.is_none());
    }

    #[tokio::test]
    async fn test_resolve_first_prefers_order() {
        let shell = Arc::new(
            FakeShell::new()
                .with_tool("python", "/usr/bin/python", "Python 3.11.8")
                .with_tool("py", "/usr/bin/py", "Python 3.9.0"),
        );
        let scanner = scanner(Arc::clone(&shell), ScannerConfig::default());

        let hit = scanner
            .resolve_first(&candidates(&["python3", "python", "py"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.0, "python");
        assert_eq!(hit.1.version.as_deref(), Some("3.11.8"));
        // One version query, only for the hit.
        assert_eq!(shell.count_containing(VERSION_FAILED_SENTINEL), 1);

        let none = scanner
            .resolve_first(&candidates(&["absent"]))
            .await
            .unwrap();
        assert!(none.is_none());
    }
}
