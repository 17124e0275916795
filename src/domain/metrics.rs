use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Version of the metrics payload shapes, reported by `bootstrap` so callers can detect drift.
pub const METRICS_SCHEMA_VERSION: u32 = 1;

/// Sampling interval bounds in milliseconds.
pub const MIN_INTERVAL_MS: u64 = 500;
pub const MAX_INTERVAL_MS: u64 = 5_000;

/// Clamp a requested sampling interval to the supported range.
pub fn clamp_interval_ms(requested: u64) -> u64 {
    requested.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS)
}

/// Collector lifecycle.
///
/// State transitions:
/// - Idle -> Sampling (worker started)
/// - Sampling -> Sampling (interval change restarts the ticker)
/// - Sampling -> Stopped (stop request or closed request channel)
///
/// There is no way back from Stopped; a new collector must be spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CollectorState {
    Idle = 0,
    Sampling = 1,
    Stopped = 2,
}

impl CollectorState {
    #[must_use]
    pub fn can_sample(&self) -> bool {
        matches!(self, CollectorState::Sampling)
    }

    #[must_use]
    pub fn can_start(&self) -> bool {
        matches!(self, CollectorState::Idle)
    }
}

impl From<u8> for CollectorState {
    fn from(value: u8) -> Self {
        match value {
            0 => CollectorState::Idle,
            1 => CollectorState::Sampling,
            _ => CollectorState::Stopped,
        }
    }
}

impl From<CollectorState> for u8 {
    fn from(state: CollectorState) -> Self {
        state as u8
    }
}

/// Atomic wrapper for CollectorState for lock-free reads.
#[derive(Debug)]
pub struct AtomicCollectorState(AtomicU8);

impl AtomicCollectorState {
    pub fn new(state: CollectorState) -> Self {
        Self(AtomicU8::new(state.into()))
    }

    pub fn load(&self) -> CollectorState {
        self.0.load(Ordering::Acquire).into()
    }

    pub fn store(&self, state: CollectorState) {
        self.0.store(state.into(), Ordering::Release);
    }

    /// Compare and swap, returns true if successful.
    pub fn compare_exchange(&self, current: CollectorState, new: CollectorState) -> bool {
        self.0
            .compare_exchange(current.into(), new.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicCollectorState {
    fn default() -> Self {
        Self::new(CollectorState::Idle)
    }
}

/// CPU sample for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSample {
    /// Global load in percent (0-100).
    pub load_percent: f64,
    pub speed_ghz: Option<f64>,
    pub temperature_c: Option<f64>,
}

/// Memory sample in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub available: u64,
    pub cached: Option<u64>,
    pub swap_total: u64,
    pub swap_used: u64,
}

/// Disk throughput since the previous sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskIoSample {
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatterySample {
    pub percent: f64,
    pub charging: bool,
    pub time_remaining_secs: Option<f64>,
}

/// Process counts by scheduler state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCounts {
    pub all: u32,
    pub running: u32,
    pub blocked: u32,
    pub sleeping: u32,
}

/// Fast-changing telemetry published once per tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveMetrics {
    pub cpu_load: Option<f64>,
    pub cpu_speed_ghz: Option<f64>,
    pub cpu_temperature_c: Option<f64>,
    pub mem_total: Option<u64>,
    pub mem_used: Option<u64>,
    pub mem_free: Option<u64>,
    pub mem_available: Option<u64>,
    pub mem_cached: Option<u64>,
    pub swap_total: Option<u64>,
    pub swap_used: Option<u64>,
    pub disk_read_per_sec: Option<f64>,
    pub disk_write_per_sec: Option<f64>,
    pub processes_all: Option<u32>,
    pub processes_running: Option<u32>,
    pub processes_blocked: Option<u32>,
    pub processes_sleeping: Option<u32>,
    pub battery_percent: Option<f64>,
    pub battery_charging: Option<bool>,
    pub battery_time_remaining_secs: Option<f64>,
    /// Epoch milliseconds of the sample.
    pub updated_at: i64,
    pub version: u64,
    pub running: bool,
    pub has_error: bool,
}

/// Slot layout of the shared metrics buffer. One `f64` per slot, `NaN` means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum MetricSlot {
    CpuLoad = 0,
    CpuSpeedGhz,
    CpuTemperatureC,
    MemTotal,
    MemUsed,
    MemFree,
    MemAvailable,
    MemCached,
    SwapTotal,
    SwapUsed,
    DiskReadPerSec,
    DiskWritePerSec,
    ProcessesAll,
    ProcessesRunning,
    ProcessesBlocked,
    ProcessesSleeping,
    BatteryPercent,
    BatteryCharging,
    BatteryTimeRemaining,
    UpdatedAt,
    Running,
    HasError,
}

/// Number of slots in the shared metrics buffer.
pub const METRIC_SLOT_COUNT: usize = MetricSlot::HasError as usize + 1;

fn opt_f64(v: Option<f64>) -> f64 {
    v.unwrap_or(f64::NAN)
}

fn opt_u64(v: Option<u64>) -> f64 {
    v.map(|x| x as f64).unwrap_or(f64::NAN)
}

fn opt_u32(v: Option<u32>) -> f64 {
    v.map(f64::from).unwrap_or(f64::NAN)
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn read_f64(v: f64) -> Option<f64> {
    (!v.is_nan()).then_some(v)
}

fn read_u64(v: f64) -> Option<u64> {
    read_f64(v).map(|x| x as u64)
}

fn read_u32(v: f64) -> Option<u32> {
    read_f64(v).map(|x| x as u32)
}

impl LiveMetrics {
    /// Encode into the fixed slot layout. The version travels separately.
    pub fn to_slots(&self) -> [f64; METRIC_SLOT_COUNT] {
        let mut slots = [f64::NAN; METRIC_SLOT_COUNT];
        slots[MetricSlot::CpuLoad as usize] = opt_f64(self.cpu_load);
        slots[MetricSlot::CpuSpeedGhz as usize] = opt_f64(self.cpu_speed_ghz);
        slots[MetricSlot::CpuTemperatureC as usize] = opt_f64(self.cpu_temperature_c);
        slots[MetricSlot::MemTotal as usize] = opt_u64(self.mem_total);
        slots[MetricSlot::MemUsed as usize] = opt_u64(self.mem_used);
        slots[MetricSlot::MemFree as usize] = opt_u64(self.mem_free);
        slots[MetricSlot::MemAvailable as usize] = opt_u64(self.mem_available);
        slots[MetricSlot::MemCached as usize] = opt_u64(self.mem_cached);
        slots[MetricSlot::SwapTotal as usize] = opt_u64(self.swap_total);
        slots[MetricSlot::SwapUsed as usize] = opt_u64(self.swap_used);
        slots[MetricSlot::DiskReadPerSec as usize] = opt_f64(self.disk_read_per_sec);
        slots[MetricSlot::DiskWritePerSec as usize] = opt_f64(self.disk_write_per_sec);
        slots[MetricSlot::ProcessesAll as usize] = opt_u32(self.processes_all);
        slots[MetricSlot::ProcessesRunning as usize] = opt_u32(self.processes_running);
        slots[MetricSlot::ProcessesBlocked as usize] = opt_u32(self.processes_blocked);
        slots[MetricSlot::ProcessesSleeping as usize] = opt_u32(self.processes_sleeping);
        slots[MetricSlot::BatteryPercent as usize] = opt_f64(self.battery_percent);
        slots[MetricSlot::BatteryCharging as usize] =
            self.battery_charging.map(flag).unwrap_or(f64::NAN);
        slots[MetricSlot::BatteryTimeRemaining as usize] =
            opt_f64(self.battery_time_remaining_secs);
        slots[MetricSlot::UpdatedAt as usize] = self.updated_at as f64;
        slots[MetricSlot::Running as usize] = flag(self.running);
        slots[MetricSlot::HasError as usize] = flag(self.has_error);
        slots
    }

    /// Decode from the fixed slot layout.
    pub fn from_slots(slots: &[f64; METRIC_SLOT_COUNT], version: u64) -> Self {
        let at = |slot: MetricSlot| slots[slot as usize];
        Self {
            cpu_load: read_f64(at(MetricSlot::CpuLoad)),
            cpu_speed_ghz: read_f64(at(MetricSlot::CpuSpeedGhz)),
            cpu_temperature_c: read_f64(at(MetricSlot::CpuTemperatureC)),
            mem_total: read_u64(at(MetricSlot::MemTotal)),
            mem_used: read_u64(at(MetricSlot::MemUsed)),
            mem_free: read_u64(at(MetricSlot::MemFree)),
            mem_available: read_u64(at(MetricSlot::MemAvailable)),
            mem_cached: read_u64(at(MetricSlot::MemCached)),
            swap_total: read_u64(at(MetricSlot::SwapTotal)),
            swap_used: read_u64(at(MetricSlot::SwapUsed)),
            disk_read_per_sec: read_f64(at(MetricSlot::DiskReadPerSec)),
            disk_write_per_sec: read_f64(at(MetricSlot::DiskWritePerSec)),
            processes_all: read_u32(at(MetricSlot::ProcessesAll)),
            processes_running: read_u32(at(MetricSlot::ProcessesRunning)),
            processes_blocked: read_u32(at(MetricSlot::ProcessesBlocked)),
            processes_sleeping: read_u32(at(MetricSlot::ProcessesSleeping)),
            battery_percent: read_f64(at(MetricSlot::BatteryPercent)),
            battery_charging: read_f64(at(MetricSlot::BatteryCharging)).map(|v| v != 0.0),
            battery_time_remaining_secs: read_f64(at(MetricSlot::BatteryTimeRemaining)),
            updated_at: read_f64(at(MetricSlot::UpdatedAt)).map(|v| v as i64).unwrap_or(0),
            version,
            running: at(MetricSlot::Running) != 0.0,
            has_error: at(MetricSlot::HasError) != 0.0,
        }
    }

    /// Assemble a sample from individual probe results. Absent probes stay `None`.
    pub fn from_samples(
        cpu: Option<CpuSample>,
        memory: Option<MemorySample>,
        disk: Option<DiskIoSample>,
        battery: Option<BatterySample>,
        processes: Option<ProcessCounts>,
        updated_at: i64,
    ) -> Self {
        Self {
            cpu_load: cpu.map(|c| c.load_percent),
            cpu_speed_ghz: cpu.and_then(|c| c.speed_ghz),
            cpu_temperature_c: cpu.and_then(|c| c.temperature_c),
            mem_total: memory.map(|m| m.total),
            mem_used: memory.map(|m| m.used),
            mem_free: memory.map(|m| m.free),
            mem_available: memory.map(|m| m.available),
            mem_cached: memory.and_then(|m| m.cached),
            swap_total: memory.map(|m| m.swap_total),
            swap_used: memory.map(|m| m.swap_used),
            disk_read_per_sec: disk.map(|d| d.read_bytes_per_sec),
            disk_write_per_sec: disk.map(|d| d.write_bytes_per_sec),
            processes_all: processes.map(|p| p.all),
            processes_running: processes.map(|p| p.running),
            processes_blocked: processes.map(|p| p.blocked),
            processes_sleeping: processes.map(|p| p.sleeping),
            battery_percent: battery.map(|b| b.percent),
            battery_charging: battery.map(|b| b.charging),
            battery_time_remaining_secs: battery.and_then(|b| b.time_remaining_secs),
            updated_at,
            version: 0,
            running: true,
            has_error: false,
        }
    }

    /// A sample is stale when the collector stopped or the last update is older than `max_age_ms`.
    pub fn is_stale(&self, now_ms: i64, max_age_ms: i64) -> bool {
        !self.running || now_ms.saturating_sub(self.updated_at) > max_age_ms
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub brand: String,
    pub vendor: Option<String>,
    pub physical_cores: Option<u32>,
    pub logical_cores: u32,
    pub frequency_mhz: u64,
    pub arch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryLayout {
    pub total: u64,
    pub swap_total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskSnapshot {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub kind: String,
    pub total_space: u64,
    pub available_space: u64,
    pub removable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsSnapshot {
    pub name: Option<String>,
    pub version: Option<String>,
    pub long_version: Option<String>,
    pub kernel: Option<String>,
    pub hostname: Option<String>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub technology: Option<String>,
    pub design_capacity_wh: Option<f64>,
    pub full_capacity_wh: Option<f64>,
    pub cycle_count: Option<u32>,
}

/// Slow-changing structural description of the machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailedSystemSnapshot {
    pub cpu: CpuSnapshot,
    pub memory: MemoryLayout,
    pub disks: Vec<DiskSnapshot>,
    pub os: OsSnapshot,
    pub battery: Option<BatterySnapshot>,
    /// Epoch milliseconds when the static data was collected.
    pub collected_at: i64,
}

/// Result of `bootstrap`, combining collector startup with a snapshot fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapResult {
    pub success: bool,
    pub schema_version: u32,
    pub snapshot: Option<DetailedSystemSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
