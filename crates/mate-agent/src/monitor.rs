use crate::config::Config;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use sysinfo::{Components, Disks, Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tokio::process::Command;
use tracing::debug;

/// One telemetry snapshot. Sections are gated by the monitoring flags;
/// a section that is disabled or failed to collect is simply absent.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub mate_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<Vec<DiskStats>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<TemperatureStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Vec<NetworkStats>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<Vec<GpuStats>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuStats {
    pub usage_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_core: Option<Vec<f64>>,
    pub cores: usize,
    pub model: String,
    pub mhz: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub used_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskStats {
    pub mount_point: String,
    pub device: String,
    pub fs_type: String,
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemperatureStats {
    pub sensors: Vec<SensorTemp>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorTemp {
    pub name: String,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStats {
    pub interface: String,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub errout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuStats {
    pub index: usize,
    pub name: String,
    pub utilization_gpu: f64,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_free: u64,
    pub memory_used_percent: f64,
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub hostname: String,
    pub os: String,
    pub platform: String,
    pub platform_version: String,
    pub kernel_version: String,
    pub uptime: u64,
}

/// Collects hardware telemetry for the stats sender and the `collect_stats`
/// command.
pub struct Monitor {
    config: Arc<Config>,
}

impl Monitor {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub async fn collect(&self) -> StatsSnapshot {
        let enabled = &self.config.monitoring.enabled;
        let mut snapshot = StatsSnapshot {
            timestamp: Utc::now(),
            mate_id: self.config.mate.id.clone(),
            cpu: None,
            memory: None,
            disk: None,
            temperature: None,
            network: None,
            gpu: None,
            // System info is always collected.
            system: Some(collect_system()),
        };

        if enabled.cpu {
            snapshot.cpu = self.collect_cpu().await;
        }
        if enabled.memory {
            snapshot.memory = Some(self.collect_memory());
        }
        if enabled.disk {
            snapshot.disk = self.collect_disk();
        }
        if enabled.temperature {
            snapshot.temperature = self.collect_temperature();
        }
        if enabled.network {
            snapshot.network = self.collect_network();
        }
        if enabled.gpu {
            snapshot.gpu = collect_gpu().await;
        }

        snapshot
    }

    async fn collect_cpu(&self) -> Option<CpuStats> {
        let mut system = System::new();
        // Usage is a delta; two refreshes bracket the sampling window.
        system.refresh_cpu();
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
        system.refresh_cpu();

        let cpus = system.cpus();
        let first = cpus.first()?;
        let per_core = if self.config.hardware.cpu.collect_per_core {
            Some(cpus.iter().map(|cpu| cpu.cpu_usage() as f64).collect())
        } else {
            None
        };
        Some(CpuStats {
            usage_percent: system.global_cpu_info().cpu_usage() as f64,
            per_core,
            cores: cpus.len(),
            model: first.brand().to_string(),
            mhz: first.frequency() as f64,
        })
    }

    fn collect_memory(&self) -> MemoryStats {
        let mut system = System::new();
        system.refresh_memory();

        let total = system.total_memory();
        let used = system.used_memory();
        let mut stats = MemoryStats {
            total,
            available: system.available_memory(),
            used,
            used_percent: percent(used, total),
            swap_total: None,
            swap_used: None,
            swap_percent: None,
        };
        if self.config.hardware.memory.include_swap {
            let swap_total = system.total_swap();
            let swap_used = system.used_swap();
            stats.swap_total = Some(swap_total);
            stats.swap_used = Some(swap_used);
            stats.swap_percent = Some(percent(swap_used, swap_total));
        }
        stats
    }

    fn collect_disk(&self) -> Option<Vec<DiskStats>> {
        let mount_points = &self.config.hardware.disk.mount_points;
        let disks = Disks::new_with_refreshed_list();
        let stats: Vec<DiskStats> = disks
            .list()
            .iter()
            .filter(|disk| {
                mount_points.is_empty()
                    || mount_points
                        .iter()
                        .any(|mp| disk.mount_point() == std::path::Path::new(mp))
            })
            .map(|disk| {
                let total = disk.total_space();
                let free = disk.available_space();
                let used = total.saturating_sub(free);
                DiskStats {
                    mount_point: disk.mount_point().display().to_string(),
                    device: disk.name().to_string_lossy().to_string(),
                    fs_type: disk.file_system().to_string_lossy().to_string(),
                    total,
                    free,
                    used,
                    used_percent: percent(used, total),
                }
            })
            .collect();
        if stats.is_empty() {
            None
        } else {
            Some(stats)
        }
    }

    fn collect_temperature(&self) -> Option<TemperatureStats> {
        let sensors = &self.config.hardware.temperature.sensors;
        let components = Components::new_with_refreshed_list();
        let collected: Vec<SensorTemp> = components
            .list()
            .iter()
            .filter(|component| {
                sensors.is_empty() || sensors.iter().any(|name| name == component.label())
            })
            .map(|component| SensorTemp {
                name: component.label().to_string(),
                temperature: component.temperature() as f64,
                high: Some(component.max() as f64).filter(|value| *value > 0.0),
                critical: component.critical().map(|value| value as f64),
            })
            .collect();
        if collected.is_empty() {
            None
        } else {
            Some(TemperatureStats { sensors: collected })
        }
    }

    fn collect_network(&self) -> Option<Vec<NetworkStats>> {
        let interfaces = &self.config.hardware.network.interfaces;
        let networks = Networks::new_with_refreshed_list();
        let stats: Vec<NetworkStats> = networks
            .iter()
            .filter(|(name, _)| interfaces.is_empty() || interfaces.iter().any(|i| i == *name))
            .map(|(name, data)| NetworkStats {
                interface: name.clone(),
                bytes_sent: data.total_transmitted(),
                bytes_recv: data.total_received(),
                packets_sent: data.total_packets_transmitted(),
                packets_recv: data.total_packets_received(),
                errin: data.total_errors_on_received(),
                errout: data.total_errors_on_transmitted(),
            })
            .collect();
        if stats.is_empty() {
            None
        } else {
            Some(stats)
        }
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

fn collect_system() -> SystemStats {
    SystemStats {
        hostname: System::host_name().unwrap_or_default(),
        os: System::name().unwrap_or_default(),
        platform: System::distribution_id(),
        platform_version: System::os_version().unwrap_or_default(),
        kernel_version: System::kernel_version().unwrap_or_default(),
        uptime: System::uptime(),
    }
}

/// NVIDIA GPUs via nvidia-smi; other vendors are not reported.
async fn collect_gpu() -> Option<Vec<GpuStats>> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,gpu_name,utilization.gpu,memory.total,memory.used,memory.free,temperature.gpu",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        debug!(event = "nvidia_smi_unavailable", status = ?output.status.code());
        return None;
    }
    let stats = parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout));
    if stats.is_empty() {
        None
    } else {
        Some(stats)
    }
}

fn parse_nvidia_smi(output: &str) -> Vec<GpuStats> {
    let mut stats = Vec::new();
    for line in output.trim().lines() {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(", ").collect();
        if fields.len() < 7 {
            continue;
        }
        let memory_total = fields[3].trim().parse::<u64>().unwrap_or(0);
        let memory_used = fields[4].trim().parse::<u64>().unwrap_or(0);
        stats.push(GpuStats {
            index: fields[0].trim().parse().unwrap_or(0),
            name: fields[1].trim().to_string(),
            utilization_gpu: fields[2].trim().parse().unwrap_or(0.0),
            memory_total,
            memory_used,
            memory_free: fields[5].trim().parse().unwrap_or(0),
            memory_used_percent: percent(memory_used, memory_total),
            temperature: fields[6].trim().parse().unwrap_or(0.0),
        });
    }
    stats
}
