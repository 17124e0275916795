use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default argument passed to a tool to print its version.
pub const DEFAULT_VERSION_ARGS: &str = "--version";

/// Tool category, used to group scans and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Language,
    PackageManager,
    BuildTool,
    Container,
    VersionControl,
    Database,
    AiMl,
}

impl ToolCategory {
    /// All categories in display order.
    pub const ALL: [ToolCategory; 7] = [
        ToolCategory::Language,
        ToolCategory::PackageManager,
        ToolCategory::BuildTool,
        ToolCategory::Container,
        ToolCategory::VersionControl,
        ToolCategory::Database,
        ToolCategory::AiMl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Language => "language",
            ToolCategory::PackageManager => "package_manager",
            ToolCategory::BuildTool => "build_tool",
            ToolCategory::Container => "container",
            ToolCategory::VersionControl => "version_control",
            ToolCategory::Database => "database",
            ToolCategory::AiMl => "ai_ml",
        }
    }

    /// Parse a category from its snake_case name.
    pub fn parse(s: &str) -> Option<Self> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|c| c.as_str() == wanted)
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health of a detected tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    NotInstalled,
    Healthy,
    /// Installed but degraded, e.g. a daemon CLI without its background process.
    Warning,
    /// Detection itself failed (misconfiguration or plumbing).
    Error,
    Unknown,
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolStatus::NotInstalled => write!(f, "not installed"),
            ToolStatus::Healthy => write!(f, "healthy"),
            ToolStatus::Warning => write!(f, "warning"),
            ToolStatus::Error => write!(f, "error"),
            ToolStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Named custom sub-detectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomDetector {
    /// Hardware accelerator probe (`nvidia-smi`).
    GpuAccelerator,
    /// Python package probe (`pip show <package>`).
    PythonPackage { package: String },
    /// A name that matched no known detector. Scanning it yields an error status.
    Unrecognized(String),
}

impl CustomDetector {
    /// Resolve a detector by name. `package` is only used by the python probe.
    pub fn resolve(name: &str, package: Option<&str>, tool_id: &str) -> Self {
        match name {
            "gpu-accelerator" => CustomDetector::GpuAccelerator,
            "python-package" => CustomDetector::PythonPackage {
                package: package.unwrap_or(tool_id).to_string(),
            },
            other => CustomDetector::Unrecognized(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CustomDetector::GpuAccelerator => "gpu-accelerator",
            CustomDetector::PythonPackage { .. } => "python-package",
            CustomDetector::Unrecognized(name) => name,
        }
    }
}

/// Detection strategy, resolved once when the registry is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionStrategy {
    Cli,
    Process { process_names: Vec<String> },
    Custom(CustomDetector),
}

impl DetectionStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            DetectionStrategy::Cli => StrategyKind::Cli,
            DetectionStrategy::Process { .. } => StrategyKind::Process,
            DetectionStrategy::Custom(_) => StrategyKind::Custom,
        }
    }
}

/// Strategy tag as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Cli,
    Process,
    Custom,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Cli => "cli",
            StrategyKind::Process => "process",
            StrategyKind::Custom => "custom",
        }
    }
}

/// Detection settings as they appear in configuration files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub strategy: StrategyKind,
    /// Overrides the tool's primary command.
    pub command: Option<String>,
    /// Background process to look for (process strategy).
    pub process_name: Option<String>,
    /// Additional process names that count as the same service.
    pub process_aliases: Vec<String>,
    /// Sub-detector name (custom strategy).
    pub custom_detector: Option<String>,
    /// Package name for the python-package detector.
    pub package: Option<String>,
    pub version_args: Option<String>,
}

/// User-supplied tool definition, loaded from `[[tools]]` in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinitionConfig {
    pub id: String,
    pub name: String,
    pub category: ToolCategory,
    pub command: String,
    #[serde(default)]
    pub alternate_commands: Vec<String>,
    #[serde(default)]
    pub version_args: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub detection: DetectionConfig,
}

/// Static descriptor of a detectable tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDefinition {
    pub id: String,
    pub display_name: String,
    pub category: ToolCategory,
    pub command: String,
    pub alternate_commands: Vec<String>,
    pub version_args: Option<String>,
    pub description: Option<String>,
    pub detection: DetectionStrategy,
}

impl ToolDefinition {
    /// A CLI-detected tool whose id doubles as its command.
    pub fn cli(id: &str, display_name: &str, category: ToolCategory) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            category,
            command: id.to_string(),
            alternate_commands: Vec::new(),
            version_args: None,
            description: None,
            detection: DetectionStrategy::Cli,
        }
    }

    pub fn command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }

    pub fn alternates(mut self, commands: &[&str]) -> Self {
        self.alternate_commands = commands.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn version_args(mut self, args: &str) -> Self {
        self.version_args = Some(args.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn process(mut self, process_names: &[&str]) -> Self {
        self.detection = DetectionStrategy::Process {
            process_names: process_names.iter().map(|p| p.to_string()).collect(),
        };
        self
    }

    pub fn custom(mut self, detector: CustomDetector) -> Self {
        self.detection = DetectionStrategy::Custom(detector);
        self
    }

    /// Primary command followed by alternates, in lookup order.
    pub fn all_commands(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.command.as_str()).chain(self.alternate_commands.iter().map(String::as_str))
    }

    /// Arguments that make this tool print its version.
    pub fn effective_version_args(&self) -> &str {
        self.version_args.as_deref().unwrap_or(DEFAULT_VERSION_ARGS)
    }
}

impl From<ToolDefinitionConfig> for ToolDefinition {
    fn from(config: ToolDefinitionConfig) -> Self {
        let detection_cfg = config.detection;
        let command = detection_cfg.command.clone().unwrap_or(config.command);

        let detection = match detection_cfg.strategy {
            StrategyKind::Cli => DetectionStrategy::Cli,
            StrategyKind::Process => {
                let mut process_names = vec![detection_cfg
                    .process_name
                    .clone()
                    .unwrap_or_else(|| command.clone())];
                process_names.extend(detection_cfg.process_aliases.iter().cloned());
                DetectionStrategy::Process { process_names }
            }
            StrategyKind::Custom => DetectionStrategy::Custom(CustomDetector::resolve(
                detection_cfg.custom_detector.as_deref().unwrap_or(""),
                detection_cfg.package.as_deref(),
                &config.id,
            )),
        };

        Self {
            id: config.id,
            display_name: config.name,
            category: config.category,
            command,
            alternate_commands: config.alternate_commands,
            version_args: detection_cfg.version_args.or(config.version_args),
            description: config.description,
            detection,
        }
    }
}

/// Result of one command in a batch scan.
///
/// Constructed only through [`BatchToolResult::found`], [`BatchToolResult::not_found`]
/// and [`BatchToolResult::failed`], so a missing command never carries a path or version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchToolResult {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchToolResult {
    pub fn found(path: Option<String>, version: Option<String>) -> Self {
        Self {
            exists: true,
            path,
            version,
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            exists: false,
            path: None,
            version: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            exists: false,
            path: None,
            version: None,
            error: Some(error.into()),
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        if self.exists {
            self.version = version;
        }
        self
    }
}

/// Batch results keyed by raw command string.
pub type BatchResults = HashMap<String, BatchToolResult>;

/// Partial outcome produced by a detection strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub installed: bool,
    pub status: ToolStatus,
    pub version: Option<String>,
    pub path: Option<String>,
    pub description: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl DetectionResult {
    pub fn not_installed() -> Self {
        Self {
            installed: false,
            status: ToolStatus::NotInstalled,
            version: None,
            path: None,
            description: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn healthy(version: Option<String>, path: Option<String>) -> Self {
        Self {
            installed: true,
            status: ToolStatus::Healthy,
            version,
            path,
            description: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            status: ToolStatus::Unknown,
            ..Self::not_installed()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        let mut result = Self {
            status: ToolStatus::Error,
            description: Some(message.clone()),
            ..Self::not_installed()
        };
        result.metadata.insert("error".to_string(), message);
        result
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Build a result from a batch lookup of `command`.
    pub fn from_batch(command: &str, result: Option<&BatchToolResult>) -> Self {
        match result {
            Some(r) if r.exists => {
                Self::healthy(r.version.clone(), r.path.clone()).with_meta("command", command)
            }
            _ => Self::not_installed(),
        }
    }
}

/// A tool as observed by one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedTool {
    pub id: String,
    pub display_name: String,
    pub category: ToolCategory,
    pub installed: bool,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub last_checked: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DetectedTool {
    /// Layer a detection result onto a fresh record for `definition`.
    ///
    /// A tool that is not installed can only be `not_installed`, `unknown` or `error`.
    pub fn from_detection(
        definition: &ToolDefinition,
        result: DetectionResult,
        checked_at: DateTime<Utc>,
    ) -> Self {
        let installed = result.installed;
        let status = if installed {
            result.status
        } else {
            match result.status {
                ToolStatus::Healthy | ToolStatus::Warning => ToolStatus::NotInstalled,
                other => other,
            }
        };

        let mut metadata = result.metadata;
        metadata
            .entry("strategy".to_string())
            .or_insert_with(|| definition.detection.kind().as_str().to_string());

        Self {
            id: definition.id.clone(),
            display_name: definition.display_name.clone(),
            category: definition.category,
            installed,
            status,
            version: result.version.filter(|_| installed),
            path: result.path.filter(|_| installed),
            description: result.description.or_else(|| definition.description.clone()),
            last_checked: checked_at,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse() {
        assert_eq!(ToolCategory::parse("language"), Some(ToolCategory::Language));
        assert_eq!(ToolCategory::parse("Package-Manager"), Some(ToolCategory::PackageManager));
        assert_eq!(ToolCategory::parse("ai_ml"), Some(ToolCategory::AiMl));
        assert_eq!(ToolCategory::parse("editors"), None);
    }

    #[test]
    fn test_custom_detector_resolve() {
        assert_eq!(
            CustomDetector::resolve("gpu-accelerator", None, "cuda"),
            CustomDetector::GpuAccelerator
        );
        assert_eq!(
            CustomDetector::resolve("python-package", None, "torch"),
            CustomDetector::PythonPackage {
                package: "torch".to_string()
            }
        );
        assert_eq!(
            CustomDetector::resolve("quantum-probe", None, "x"),
            CustomDetector::Unrecognized("quantum-probe".to_string())
        );
    }

    #[test]
    fn test_definition_from_config_process() {
        let config: ToolDefinitionConfig = toml::from_str(
            r#"
            id = "redis"
            name = "Redis"
            category = "database"
            command = "redis-cli"

            [detection]
            strategy = "process"
            process_name = "redis-server"
            process_aliases = ["redis-stack-server"]
            version_args = "-v"
            "#,
        )
        .unwrap();

        let def = ToolDefinition::from(config);
        assert_eq!(def.command, "redis-cli");
        assert_eq!(def.effective_version_args(), "-v");
        assert_eq!(
            def.detection,
            DetectionStrategy::Process {
                process_names: vec!["redis-server".to_string(), "redis-stack-server".to_string()]
            }
        );
    }

    #[test]
    fn test_all_commands_order() {
        let def = ToolDefinition::cli("python", "Python", ToolCategory::Language)
            .command("python3")
            .alternates(&["python", "py"]);
        let commands: Vec<&str> = def.all_commands().collect();
        assert_eq!(commands, vec!["python3", "python", "py"]);
    }

    #[test]
    fn test_batch_result_invariant() {
        let missing = BatchToolResult::not_found().with_version(Some("1.0.0".to_string()));
        assert!(!missing.exists);
        assert!(missing.version.is_none());
        assert!(missing.path.is_none());

        let failed = BatchToolResult::failed("Scan failed");
        assert!(!failed.exists);
        assert_eq!(failed.error.as_deref(), Some("Scan failed"));
    }

    #[test]
    fn test_detected_tool_not_installed_status() {
        let def = ToolDefinition::cli("git", "Git", ToolCategory::VersionControl);
        let mut result = DetectionResult::healthy(Some("2.40.0".to_string()), Some("/usr/bin/git".to_string()));
        result.installed = false;

        let tool = DetectedTool::from_detection(&def, result, Utc::now());
        assert!(!tool.installed);
        assert_eq!(tool.status, ToolStatus::NotInstalled);
        assert!(tool.version.is_none());
        assert!(tool.path.is_none());
        assert_eq!(tool.metadata.get("strategy").map(String::as_str), Some("cli"));
    }

    #[test]
    fn test_detection_error_keeps_message() {
        let def = ToolDefinition::cli("x", "X", ToolCategory::AiMl);
        let tool = DetectedTool::from_detection(&def, DetectionResult::error("boom"), Utc::now());
        assert_eq!(tool.status, ToolStatus::Error);
        assert_eq!(tool.description.as_deref(), Some("boom"));
        assert_eq!(tool.metadata.get("error").map(String::as_str), Some("boom"));
    }
}
