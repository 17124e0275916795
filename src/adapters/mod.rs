pub mod batch_scanner;
pub mod config_store;
pub mod detectors;
pub mod json_tool_cache;
pub mod metrics_collector;
pub mod shell_executor;
pub mod sysinfo_source;

pub use batch_scanner::{BatchCandidate, UnifiedBatchScanner};
pub use config_store::TomlConfigStore;
pub use detectors::Detectors;
pub use json_tool_cache::JsonToolCache;
pub use metrics_collector::{spawn_collector, CollectorHandle};
pub use shell_executor::SystemShell;
pub use sysinfo_source::SysinfoMetricsSource;
