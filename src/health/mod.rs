// Health sampling: bounded CPU/memory history, service status, threshold alerts.

mod ring;
mod threshold;

pub use ring::RingBuffer;
pub use threshold::{Crossing, ThresholdAlarm};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::instrument;

use crate::config::AppConfig;
use crate::executor::{CommandExecutor, CommandTemplate};
use crate::models::{
    CpuSample, DiskUsage, InitialState, MemorySample, NotificationKind, ServiceStatus,
    ServiceStatusMap, SystemUpdate, TickStats,
};
use crate::notifier::Notifier;
use crate::sysinfo_repo::SysinfoRepo;

/// Shared health state. Readers never observe a tick half-applied.
pub struct HealthState {
    cpu: RingBuffer<CpuSample>,
    memory: RingBuffer<MemorySample>,
    disk: Option<DiskUsage>,
    services: ServiceStatusMap,
    last_update: Option<DateTime<Utc>>,
}

impl HealthState {
    pub fn new(capacity: usize) -> Self {
        Self {
            cpu: RingBuffer::new(capacity),
            memory: RingBuffer::new(capacity),
            disk: None,
            services: ServiceStatusMap::new(),
            last_update: None,
        }
    }
}

/// Cloneable read access to the health state.
#[derive(Clone)]
pub struct HealthHandle {
    state: Arc<RwLock<HealthState>>,
}

impl HealthHandle {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(HealthState::new(capacity))),
        }
    }

    pub fn snapshot(&self) -> InitialState {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        InitialState {
            cpu: state.cpu.to_vec(),
            memory: state.memory.to_vec(),
            disk: state.disk.clone(),
            services: state.services.clone(),
            last_update: state.last_update,
        }
    }

    pub fn latest_cpu(&self) -> Option<f64> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.cpu.latest().map(|s| s.value)
    }

    pub fn latest_memory_percent(&self) -> Option<f64> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.memory.latest().map(MemorySample::usage_percent)
    }

    pub fn services(&self) -> ServiceStatusMap {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.services.clone()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HealthState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Raw values gathered by one tick. A `None` metric means its probe failed.
#[derive(Debug, Clone)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub cpu: Option<f64>,
    /// (total, used) bytes.
    pub memory: Option<(u64, u64)>,
    pub disk: Option<DiskUsage>,
    pub services: ServiceStatusMap,
}

/// What a tick changed, for logs and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub stats: TickStats,
    pub alerts_sent: usize,
}

pub struct HealthSampler {
    sysinfo: SysinfoRepo,
    executor: CommandExecutor,
    probe: CommandTemplate,
    services: Vec<String>,
    probe_timeout: Duration,
    handle: HealthHandle,
    cpu_alarm: Mutex<ThresholdAlarm>,
    memory_alarm: Mutex<ThresholdAlarm>,
    notifier: Arc<Notifier>,
}

impl HealthSampler {
    pub fn new(
        config: &AppConfig,
        sysinfo: SysinfoRepo,
        executor: CommandExecutor,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            sysinfo,
            executor,
            probe: config.commands.service_probe.clone(),
            services: config.monitoring.services.clone(),
            probe_timeout: Duration::from_secs(config.timeouts.probe_secs),
            handle: HealthHandle::new(config.monitoring.history_capacity),
            cpu_alarm: Mutex::new(ThresholdAlarm::new(config.monitoring.cpu_threshold_percent)),
            memory_alarm: Mutex::new(ThresholdAlarm::new(
                config.monitoring.memory_threshold_percent,
            )),
            notifier,
        }
    }

    pub fn handle(&self) -> HealthHandle {
        self.handle.clone()
    }

    /// One sampling tick: collect, then apply.
    #[instrument(skip(self), fields(worker = "health", operation = "tick"))]
    pub async fn tick(&self) -> TickReport {
        let reading = self.collect().await;
        self.apply(reading).await
    }

    /// Reads metrics and probes services concurrently. Never fails; failed probes are `None`.
    pub async fn collect(&self) -> Reading {
        let (cpu, memory, disk, services) = tokio::join!(
            self.sysinfo.get_cpu_load(),
            self.sysinfo.get_memory(),
            self.sysinfo.get_root_disk(),
            self.probe_services(),
        );
        Reading {
            timestamp: Utc::now(),
            cpu: cpu
                .inspect_err(|e| tracing::warn!(error = %e, "cpu probe failed"))
                .ok(),
            memory: memory
                .inspect_err(|e| tracing::warn!(error = %e, "memory probe failed"))
                .ok(),
            disk: disk
                .inspect_err(|e| tracing::warn!(error = %e, "disk probe failed"))
                .ok(),
            services,
        }
    }

    async fn probe_services(&self) -> ServiceStatusMap {
        let probes = self.services.iter().map(|service| async move {
            let running = match self.probe.render(&[("service", service.as_str())]) {
                Ok(spec) => self.executor.run(&spec, Some(self.probe_timeout)).await.success(),
                Err(e) => {
                    tracing::warn!(error = %e, service = %service, "service probe misconfigured");
                    false
                }
            };
            (
                service.clone(),
                ServiceStatus {
                    running,
                    checked_at: Utc::now(),
                },
            )
        });
        join_all(probes).await.into_iter().collect()
    }

    /// Appends the reading to history, replaces service status, raises alerts on crossings
    /// and publishes the tick to observers.
    pub async fn apply(&self, reading: Reading) -> TickReport {
        let memory_sample = reading.memory.map(|(total, used)| MemorySample {
            timestamp: reading.timestamp,
            total_bytes: total,
            used_bytes: used,
        });
        let stats = TickStats {
            timestamp: reading.timestamp,
            cpu: reading.cpu,
            memory: memory_sample.as_ref().map(MemorySample::usage_percent),
            disk_usage_percent: reading.disk.as_ref().map(|d| d.usage_percent),
        };

        {
            let mut state = self.handle.write();
            if let Some(value) = reading.cpu {
                state.cpu.push(CpuSample {
                    timestamp: reading.timestamp,
                    value,
                });
            }
            if let Some(sample) = memory_sample {
                state.memory.push(sample);
            }
            if reading.disk.is_some() {
                state.disk = reading.disk.clone();
            }
            state.services = reading.services.clone();
            state.last_update = Some(reading.timestamp);
        }

        let cpu_crossing = stats
            .cpu
            .map(|v| observe(&self.cpu_alarm, v))
            .unwrap_or(Crossing::Normal);
        let memory_crossing = stats
            .memory
            .map(|v| observe(&self.memory_alarm, v))
            .unwrap_or(Crossing::Normal);

        let mut alerts_sent = 0;
        if cpu_crossing == Crossing::Raised
            && let Some(usage) = stats.cpu
        {
            let sent = self
                .notifier
                .emit(
                    NotificationKind::Error,
                    "High CPU usage detected",
                    json!({ "usage": format!("{:.1}", usage) }),
                )
                .await;
            alerts_sent += usize::from(sent.is_some());
        }
        if memory_crossing == Crossing::Raised
            && let Some(usage) = stats.memory
        {
            let sent = self
                .notifier
                .emit(
                    NotificationKind::Error,
                    "High memory usage detected",
                    json!({ "usage": format!("{:.1}", usage) }),
                )
                .await;
            alerts_sent += usize::from(sent.is_some());
        }
        for (metric, crossing) in [("cpu", cpu_crossing), ("memory", memory_crossing)] {
            if crossing == Crossing::Cleared {
                tracing::info!(metric, "usage back under threshold");
            }
        }

        self.notifier.publish(SystemUpdate::Stats(stats.clone()));
        self.notifier
            .publish(SystemUpdate::ServiceStatus(reading.services));

        tracing::debug!(
            cpu = ?stats.cpu,
            memory = ?stats.memory,
            disk = ?stats.disk_usage_percent,
            alerts_sent,
            "health tick applied"
        );
        TickReport { stats, alerts_sent }
    }
}

fn observe(alarm: &Mutex<ThresholdAlarm>, value: f64) -> Crossing {
    alarm
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .observe(value)
}
