// Aggregated stats returned by get-stats

use serde::{Deserialize, Serialize};

use super::{CpuSample, MemorySample, ServiceStatusMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelStats {
    pub system: SystemSummary,
    pub sites: SiteCounts,
    pub ssl: CertificateCounts,
    /// Absent when the database tool is not configured or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub databases: Option<DatabaseStats>,
    pub services: ServiceStatusMap,
    pub history: MetricHistory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSummary {
    pub cpu: f64,
    pub memory: f64,
    pub disk_usage: Option<f64>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteCounts {
    pub active: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateCounts {
    pub issued: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub total: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricHistory {
    pub cpu: Vec<CpuSample>,
    pub memory: Vec<MemorySample>,
}
