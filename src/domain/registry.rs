use std::collections::HashMap;

use super::error::DomainError;
use super::tool::{
    CustomDetector, DetectionStrategy, ToolCategory, ToolDefinition, ToolDefinitionConfig,
};

/// Read-only registry of tool definitions, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Build a registry from explicit definitions. Later duplicates replace earlier ones.
    pub fn new(definitions: Vec<ToolDefinition>) -> Result<Self, DomainError> {
        let mut tools: Vec<ToolDefinition> = Vec::with_capacity(definitions.len());
        let mut index = HashMap::new();

        for def in definitions {
            validate(&def)?;
            match index.get(&def.id) {
                Some(&pos) => tools[pos] = def,
                None => {
                    index.insert(def.id.clone(), tools.len());
                    tools.push(def);
                }
            }
        }

        Ok(Self { tools, index })
    }

    /// The built-in registry extended with user definitions from configuration.
    pub fn with_overrides(overrides: Vec<ToolDefinitionConfig>) -> Result<Self, DomainError> {
        let mut definitions = builtin_tools();
        definitions.extend(overrides.into_iter().map(ToolDefinition::from));
        Self::new(definitions)
    }

    pub fn builtin() -> Self {
        // Built-in definitions are static and always valid.
        let tools = builtin_tools();
        let index = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        Self { tools, index }
    }

    pub fn get(&self, id: &str) -> Option<&ToolDefinition> {
        self.index.get(id).map(|&i| &self.tools[i])
    }

    pub fn all(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn by_category(&self, category: ToolCategory) -> Vec<&ToolDefinition> {
        self.tools.iter().filter(|t| t.category == category).collect()
    }

    /// Categories that have at least one tool, in display order.
    pub fn categories(&self) -> Vec<ToolCategory> {
        ToolCategory::ALL
            .into_iter()
            .filter(|c| self.tools.iter().any(|t| t.category == *c))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn validate(def: &ToolDefinition) -> Result<(), DomainError> {
    if def.id.trim().is_empty() {
        return Err(DomainError::Config("Tool definition with empty id".to_string()));
    }
    if def.command.trim().is_empty() {
        return Err(DomainError::Config(format!(
            "Tool '{}' has an empty command",
            def.id
        )));
    }
    if let DetectionStrategy::Process { process_names } = &def.detection {
        if process_names.iter().all(|p| p.trim().is_empty()) {
            return Err(DomainError::Config(format!(
                "Tool '{}' uses the process strategy without a process name",
                def.id
            )));
        }
    }
    Ok(())
}

fn builtin_tools() -> Vec<ToolDefinition> {
    use ToolCategory::*;

    vec![
        // Languages
        ToolDefinition::cli("node", "Node.js", Language),
        ToolDefinition::cli("python", "Python", Language)
            .command("python3")
            .alternates(&["python", "py"]),
        ToolDefinition::cli("go", "Go", Language).version_args("version"),
        ToolDefinition::cli("rust", "Rust", Language).command("rustc"),
        ToolDefinition::cli("java", "Java", Language).version_args("-version"),
        ToolDefinition::cli("ruby", "Ruby", Language),
        ToolDefinition::cli("php", "PHP", Language),
        ToolDefinition::cli("dotnet", ".NET SDK", Language),
        ToolDefinition::cli("deno", "Deno", Language),
        ToolDefinition::cli("bun", "Bun", Language),
        // Package managers
        ToolDefinition::cli("npm", "npm", PackageManager),
        ToolDefinition::cli("yarn", "Yarn", PackageManager),
        ToolDefinition::cli("pnpm", "pnpm", PackageManager),
        ToolDefinition::cli("pip", "pip", PackageManager)
            .command("pip3")
            .alternates(&["pip"]),
        ToolDefinition::cli("cargo", "Cargo", PackageManager),
        ToolDefinition::cli("brew", "Homebrew", PackageManager),
        ToolDefinition::cli("composer", "Composer", PackageManager),
        ToolDefinition::cli("gem", "RubyGems", PackageManager),
        // Build tools
        ToolDefinition::cli("make", "Make", BuildTool).alternates(&["gmake"]),
        ToolDefinition::cli("cmake", "CMake", BuildTool),
        ToolDefinition::cli("ninja", "Ninja", BuildTool),
        ToolDefinition::cli("gradle", "Gradle", BuildTool),
        ToolDefinition::cli("maven", "Maven", BuildTool).command("mvn"),
        ToolDefinition::cli("bazel", "Bazel", BuildTool).alternates(&["bazelisk"]),
        // Containers
        ToolDefinition::cli("docker", "Docker", Container)
            .process(&["dockerd", "com.docker.backend", "Docker Desktop"])
            .description("Container runtime"),
        ToolDefinition::cli("podman", "Podman", Container),
        ToolDefinition::cli("kubectl", "kubectl", Container).version_args("version --client"),
        ToolDefinition::cli("helm", "Helm", Container).version_args("version --short"),
        // Version control
        ToolDefinition::cli("git", "Git", VersionControl),
        ToolDefinition::cli("git-lfs", "Git LFS", VersionControl),
        ToolDefinition::cli("gh", "GitHub CLI", VersionControl),
        ToolDefinition::cli("svn", "Subversion", VersionControl).version_args("--version --quiet"),
        ToolDefinition::cli("hg", "Mercurial", VersionControl),
        // Databases
        ToolDefinition::cli("postgres", "PostgreSQL", Database)
            .command("psql")
            .process(&["postgres", "postmaster"]),
        ToolDefinition::cli("mysql", "MySQL", Database)
            .process(&["mysqld", "mariadbd"]),
        ToolDefinition::cli("redis", "Redis", Database)
            .command("redis-cli")
            .process(&["redis-server"]),
        ToolDefinition::cli("mongodb", "MongoDB", Database)
            .command("mongosh")
            .alternates(&["mongo"])
            .process(&["mongod"]),
        ToolDefinition::cli("sqlite", "SQLite", Database).command("sqlite3"),
        // AI / ML
        ToolDefinition::cli("ollama", "Ollama", AiMl).process(&["ollama"]),
        ToolDefinition::cli("nvidia-gpu", "NVIDIA GPU", AiMl)
            .command("nvidia-smi")
            .custom(CustomDetector::GpuAccelerator),
        ToolDefinition::cli("pytorch", "PyTorch", AiMl)
            .command("python3")
            .custom(CustomDetector::PythonPackage {
                package: "torch".to_string(),
            }),
        ToolDefinition::cli("tensorflow", "TensorFlow", AiMl)
            .command("python3")
            .custom(CustomDetector::PythonPackage {
                package: "tensorflow".to_string(),
            }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tool::{DetectionConfig, StrategyKind};

    #[test]
    fn test_builtin_ids_unique() {
        let registry = ToolRegistry::builtin();
        let rebuilt = ToolRegistry::new(registry.all().to_vec()).unwrap();
        assert_eq!(rebuilt.len(), registry.len());
        assert!(registry.get("git").is_some());
        assert!(registry.get("does-not-exist").is_none());
    }

    #[test]
    fn test_builtin_covers_every_category() {
        let registry = ToolRegistry::builtin();
        assert_eq!(registry.categories(), ToolCategory::ALL.to_vec());
    }

    #[test]
    fn test_override_replaces_builtin() {
        let override_git = ToolDefinitionConfig {
            id: "git".to_string(),
            name: "Git (custom)".to_string(),
            category: ToolCategory::VersionControl,
            command: "git2".to_string(),
            alternate_commands: vec![],
            version_args: None,
            description: None,
            detection: DetectionConfig::default(),
        };
        let registry = ToolRegistry::with_overrides(vec![override_git]).unwrap();

        assert_eq!(registry.len(), ToolRegistry::builtin().len());
        let git = registry.get("git").unwrap();
        assert_eq!(git.display_name, "Git (custom)");
        assert_eq!(git.command, "git2");
    }

    #[test]
    fn test_unknown_custom_detector_loads() {
        let config = ToolDefinitionConfig {
            id: "tpu".to_string(),
            name: "TPU".to_string(),
            category: ToolCategory::AiMl,
            command: "tpu-info".to_string(),
            alternate_commands: vec![],
            version_args: None,
            description: None,
            detection: DetectionConfig {
                strategy: StrategyKind::Custom,
                custom_detector: Some("tpu-probe".to_string()),
                ..Default::default()
            },
        };
        let registry = ToolRegistry::with_overrides(vec![config]).unwrap();
        assert_eq!(
            registry.get("tpu").unwrap().detection,
            DetectionStrategy::Custom(CustomDetector::Unrecognized("tpu-probe".to_string()))
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        let def = ToolDefinition::cli("broken", "Broken", ToolCategory::BuildTool).command("  ");
        let err = ToolRegistry::new(vec![def]).unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }
}
