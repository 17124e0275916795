mod controller;
mod metrics_bridge;
mod sensing_engine;

pub use controller::AppController;
pub use metrics_bridge::MetricsBridge;
pub use sensing_engine::{CachedResults, ScanProgress, SensingEngine, ToolsByCategory};
