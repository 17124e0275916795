use std::time::Instant;

use battery::units::energy::watt_hour;
use parking_lot::Mutex;
use sysinfo::{Components, Disks, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info};

use crate::domain::metrics::{
    BatterySnapshot, CpuSnapshot, DiskSnapshot, MemoryLayout, OsSnapshot,
};
use crate::domain::{
    BatterySample, CpuSample, DetailedSystemSnapshot, DiskIoSample, DomainError, MemorySample,
    ProcessCounts,
};
use crate::ports::MetricsSource;

/// Component labels that report CPU package or core temperature.
const CPU_SENSOR_HINTS: [&str; 5] = ["cpu", "package", "tctl", "tdie", "core"];

/// Cumulative disk counters from the previous sample.
#[derive(Debug, Clone, Copy)]
struct DiskTotals {
    at: Instant,
    read: u64,
    written: u64,
}

/// Telemetry read through `sysinfo` and `battery`.
///
/// CPU load needs two refreshes to produce a value, so the system handle lives
/// as long as the source and the first CPU reading after construction is primed.
pub struct SysinfoMetricsSource {
    system: Mutex<System>,
    process_system: Mutex<System>,
    last_disk: Mutex<Option<DiskTotals>>,
}

impl SysinfoMetricsSource {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();
        info!(cpus = system.cpus().len(), "Telemetry source initialized");

        Self {
            system: Mutex::new(system),
            process_system: Mutex::new(System::new()),
            last_disk: Mutex::new(None),
        }
    }

    fn disk_totals() -> (u64, u64) {
        Disks::new_with_refreshed_list()
            .iter()
            .fold((0, 0), |(read, written), d| {
                let usage = d.usage();
                (
                    read.saturating_add(usage.total_read_bytes),
                    written.saturating_add(usage.total_written_bytes),
                )
            })
    }

    fn cpu_temperature() -> Option<f64> {
        Components::new_with_refreshed_list()
            .iter()
            .filter(|c| {
                let label = c.label().to_lowercase();
                CPU_SENSOR_HINTS.iter().any(|hint| label.contains(hint))
            })
            .filter_map(|c| c.temperature())
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(f64::from)
            .reduce(f64::max)
    }

    fn battery_snapshot() -> Option<BatterySnapshot> {
        let manager = battery::Manager::new().ok()?;
        let pack = manager.batteries().ok()?.flatten().next()?;
        Some(BatterySnapshot {
            vendor: pack.vendor().map(str::to_string),
            model: pack.model().map(str::to_string),
            technology: Some(format!("{:?}", pack.technology())),
            design_capacity_wh: Some(f64::from(pack.energy_full_design().get::<watt_hour>())),
            full_capacity_wh: Some(f64::from(pack.energy_full().get::<watt_hour>())),
            cycle_count: pack.cycle_count(),
        })
    }
}

impl Default for SysinfoMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SysinfoMetricsSource {
    fn cpu(&self) -> Result<CpuSample, DomainError> {
        let (load, frequency_mhz) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            if system.cpus().is_empty() {
                return Err(DomainError::Collector("No CPU information available".to_string()));
            }
            let frequency = system.cpus().first().map(|c| c.frequency()).unwrap_or(0);
            (system.global_cpu_usage(), frequency)
        };

        Ok(CpuSample {
            load_percent: f64::from(load).clamp(0.0, 100.0),
            speed_ghz: (frequency_mhz > 0).then(|| frequency_mhz as f64 / 1000.0),
            temperature_c: Self::cpu_temperature(),
        })
    }

    fn memory(&self) -> Result<MemorySample, DomainError> {
        let mut system = self.system.lock();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(DomainError::Collector("Memory totals unavailable".to_string()));
        }
        let available = system.available_memory();
        let free = system.free_memory();

        Ok(MemorySample {
            total,
            used: system.used_memory(),
            free,
            available,
            // Reclaimable page cache is what is available beyond the truly free pages.
            cached: available.checked_sub(free).filter(|c| *c > 0),
            swap_total: system.total_swap(),
            swap_used: system.used_swap(),
        })
    }

    fn disk_io(&self) -> Result<DiskIoSample, DomainError> {
        let (read, written) = Self::disk_totals();
        let now = Instant::now();
        let previous = self.last_disk.lock().replace(DiskTotals {
            at: now,
            read,
            written,
        });

        let Some(previous) = previous else {
            return Ok(DiskIoSample::default());
        };
        let elapsed = now.duration_since(previous.at).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return Ok(DiskIoSample::default());
        }

        Ok(DiskIoSample {
            read_bytes_per_sec: read.saturating_sub(previous.read) as f64 / elapsed,
            write_bytes_per_sec: written.saturating_sub(previous.written) as f64 / elapsed,
        })
    }

    fn battery(&self) -> Result<Option<BatterySample>, DomainError> {
        let manager = match battery::Manager::new() {
            Ok(manager) => manager,
            Err(e) => {
                debug!(error = %e, "Battery manager unavailable");
                return Ok(None);
            }
        };
        let batteries = manager
            .batteries()
            .map_err(|e| DomainError::Collector(format!("Battery enumeration failed: {}", e)))?;

        let Some(pack) = batteries.flatten().next() else {
            return Ok(None);
        };

        let charging = pack.state() == battery::State::Charging;
        let remaining = if charging {
            pack.time_to_full()
        } else {
            pack.time_to_empty()
        };

        Ok(Some(BatterySample {
            percent: f64::from(pack.state_of_charge().value) * 100.0,
            charging,
            time_remaining_secs: remaining.map(|t| f64::from(t.value)),
        }))
    }

    fn processes(&self) -> Result<ProcessCounts, DomainError> {
        let mut system = self.process_system.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let mut counts = ProcessCounts::default();
        for process in system.processes().values() {
            counts.all += 1;
            match process.status() {
                ProcessStatus::Run => counts.running += 1,
                ProcessStatus::UninterruptibleDiskSleep => counts.blocked += 1,
                ProcessStatus::Sleep | ProcessStatus::Idle => counts.sleeping += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    fn snapshot(&self) -> Result<DetailedSystemSnapshot, DomainError> {
        let (cpu, memory) = {
            let mut system = self.system.lock();
            system.refresh_cpu_all();
            system.refresh_memory();

            let first = system.cpus().first();
            let cpu = CpuSnapshot {
                brand: first.map(|c| c.brand().trim().to_string()).unwrap_or_default(),
                vendor: first.map(|c| c.vendor_id().to_string()),
                physical_cores: System::physical_core_count().map(|n| n as u32),
                logical_cores: system.cpus().len() as u32,
                frequency_mhz: first.map(|c| c.frequency()).unwrap_or(0),
                arch: std::env::consts::ARCH.to_string(),
            };
            let memory = MemoryLayout {
                total: system.total_memory(),
                swap_total: system.total_swap(),
            };
            (cpu, memory)
        };

        let disks = Disks::new_with_refreshed_list()
            .iter()
            .map(|d| DiskSnapshot {
                name: d.name().to_string_lossy().to_string(),
                mount_point: d.mount_point().to_string_lossy().to_string(),
                file_system: d.file_system().to_string_lossy().to_string(),
                kind: format!("{:?}", d.kind()),
                total_space: d.total_space(),
                available_space: d.available_space(),
                removable: d.is_removable(),
            })
            .collect();

        let os = OsSnapshot {
            name: System::name(),
            version: System::os_version(),
            long_version: System::long_os_version(),
            kernel: System::kernel_version(),
            hostname: System::host_name(),
            uptime_secs: System::uptime(),
        };

        Ok(DetailedSystemSnapshot {
            cpu,
            memory,
            disks,
            os,
            battery: Self::battery_snapshot(),
            collected_at: chrono::Utc::now().timestamp_millis(),
        })
    }
}
