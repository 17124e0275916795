pub mod logging;
pub mod rpc;
pub mod shared_buffer;
pub mod ttl_cache;

pub use logging::init_logging;
pub use rpc::{PendingReply, PendingRequests};
pub use shared_buffer::{metrics_buffer, MetricsBufferReader, MetricsBufferWriter};
pub use ttl_cache::TtlCache;
