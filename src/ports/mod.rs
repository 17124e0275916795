pub mod config;
pub mod metrics_source;
pub mod shell;
pub mod tool_cache;

pub use config::ConfigStore;
pub use metrics_source::{MetricsSource, MetricsSourceFactory};
pub use shell::{ShellExecutor, ShellOutput};
pub use tool_cache::ToolCache;
