// CPU, memory and filesystem readings via sysinfo

use std::sync::Arc;
use std::time::Instant;
use sysinfo::{Disks, System};
use tracing::instrument;

use crate::models::DiskUsage;

pub struct SysinfoRepo {
    sys: Arc<std::sync::Mutex<System>>,
    disks: Arc<std::sync::Mutex<Disks>>,
    last_cpu_refresh: Arc<std::sync::Mutex<Option<Instant>>>,
}

impl Default for SysinfoRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoRepo {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let disks = Disks::new_with_refreshed_list();
        Self {
            sys: Arc::new(std::sync::Mutex::new(sys)),
            disks: Arc::new(std::sync::Mutex::new(disks)),
            last_cpu_refresh: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Global CPU load in percent since the previous call.
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "get_cpu_load"))]
    pub async fn get_cpu_load(&self) -> anyhow::Result<f64> {
        let sys = self.sys.clone();
        let last_cpu_refresh = self.last_cpu_refresh.clone();
        tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
            let mut last = last_cpu_refresh
                .lock()
                .map_err(|e| anyhow::anyhow!("cpu refresh lock poisoned: {}", e))?;

            let now = Instant::now();
            let needs_baseline =
                last.is_none_or(|prev| now.duration_since(prev) < sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            if needs_baseline {
                // Usage is a delta between two refreshes; take the first one now.
                sys.refresh_cpu_all();
                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            }
            sys.refresh_cpu_all();
            *last = Some(Instant::now());

            Ok((sys.global_cpu_usage() as f64).clamp(0.0, 100.0))
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }

    /// (total, used) memory in bytes. Used = total - available.
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "get_memory"))]
    pub async fn get_memory(&self) -> anyhow::Result<(u64, u64)> {
        let sys = self.sys.clone();
        tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
            sys.refresh_memory();
            let total = sys.total_memory();
            anyhow::ensure!(total > 0, "total memory reported as 0");
            let used = total.saturating_sub(sys.available_memory());
            Ok((total, used))
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }

    /// Usage of the filesystem mounted at `/`, or the largest one when `/` is not listed.
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "get_root_disk"))]
    pub async fn get_root_disk(&self) -> anyhow::Result<DiskUsage> {
        let disks = self.disks.clone();
        tokio::task::spawn_blocking(move || {
            let mut disks_guard = disks
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo disks lock poisoned: {}", e))?;
            disks_guard.refresh(true);
            let usages: Vec<DiskUsage> = disks_guard
                .list()
                .iter()
                .map(|d| {
                    let total = d.total_space();
                    let used = total.saturating_sub(d.available_space());
                    DiskUsage {
                        mount: d.mount_point().to_string_lossy().into_owned(),
                        total_bytes: total,
                        used_bytes: used,
                        usage_percent: percent(used, total),
                    }
                })
                .collect();
            pick_root(usages).ok_or_else(|| anyhow::anyhow!("no mounted filesystems reported"))
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

fn pick_root(usages: Vec<DiskUsage>) -> Option<DiskUsage> {
    let mut fallback: Option<DiskUsage> = None;
    for usage in usages {
        if usage.mount == "/" {
            return Some(usage);
        }
        if fallback
            .as_ref()
            .is_none_or(|f| usage.total_bytes > f.total_bytes)
        {
            fallback = Some(usage);
        }
    }
    fallback
}
