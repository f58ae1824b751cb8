// Push-channel payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CpuSample, DiskUsage, MemorySample, Notification, ServiceStatusMap};

/// Anything delivered to connected observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PanelEvent {
    Update(SystemUpdate),
    Notification(Notification),
}

/// `{type, data}` envelope for state pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SystemUpdate {
    Initial(InitialState),
    Stats(TickStats),
    ServiceStatus(ServiceStatusMap),
}

/// Per-tick stats; a field is absent when its probe failed on that tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickStats {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_usage_percent: Option<f64>,
}

/// Current state sent to an observer when it connects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialState {
    pub cpu: Vec<CpuSample>,
    pub memory: Vec<MemorySample>,
    pub disk: Option<DiskUsage>,
    pub services: ServiceStatusMap,
    pub last_update: Option<DateTime<Utc>>,
}
