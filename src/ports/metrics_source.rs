use crate::domain::{
    BatterySample, CpuSample, DetailedSystemSnapshot, DiskIoSample, DomainError, MemorySample,
    ProcessCounts,
};

/// Port for reading machine telemetry.
///
/// Methods are blocking; the collector runs each one on the blocking pool under
/// its own timeout. One source instance lives exactly as long as one collector.
pub trait MetricsSource: Send + Sync {
    fn cpu(&self) -> Result<CpuSample, DomainError>;

    fn memory(&self) -> Result<MemorySample, DomainError>;

    fn disk_io(&self) -> Result<DiskIoSample, DomainError>;

    /// `None` on machines without a battery.
    fn battery(&self) -> Result<Option<BatterySample>, DomainError>;

    fn processes(&self) -> Result<ProcessCounts, DomainError>;

    /// Expensive structural data, collected on demand only.
    fn snapshot(&self) -> Result<DetailedSystemSnapshot, DomainError>;
}

/// Creates a fresh source for each collector instance.
pub type MetricsSourceFactory =
    std::sync::Arc<dyn Fn() -> Result<Box<dyn MetricsSource>, DomainError> + Send + Sync>;
