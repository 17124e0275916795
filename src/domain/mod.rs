pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod tool;

pub use config::{AppConfig, CacheKeying, EngineConfig, MetricsConfig, ScannerConfig};
pub use error::DomainError;
pub use metrics::{
    AtomicCollectorState, BatterySample, BootstrapResult, CollectorState, CpuSample,
    DetailedSystemSnapshot, DiskIoSample, LiveMetrics, MemorySample, ProcessCounts,
};
pub use protocol::{CollectorAction, CollectorMessage, CollectorRequest, CollectorResponse};
pub use registry::ToolRegistry;
pub use tool::{
    BatchResults, BatchToolResult, CustomDetector, DetectedTool, DetectionResult,
    DetectionStrategy, ToolCategory, ToolDefinition, ToolStatus,
};
