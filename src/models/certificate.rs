// Certificate record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateStatus {
    Requested,
    Issued,
    Failed,
    Renewing,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Requested => "Requested",
            CertificateStatus::Issued => "Issued",
            CertificateStatus::Failed => "Failed",
            CertificateStatus::Renewing => "Renewing",
        }
    }
}

impl FromStr for CertificateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Requested" => Ok(CertificateStatus::Requested),
            "Issued" => Ok(CertificateStatus::Issued),
            "Failed" => Ok(CertificateStatus::Failed),
            "Renewing" => Ok(CertificateStatus::Renewing),
            other => Err(format!("unknown certificate status: {}", other)),
        }
    }
}

/// One record per domain; the last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    pub domain: String,
    pub email: String,
    pub status: CertificateStatus,
    pub last_attempt: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Set once the ACME client has issued a certificate for the domain. Such records stay
    /// in the renewal set whatever their latest status.
    pub issued_at: Option<DateTime<Utc>>,
}

impl CertificateRecord {
    /// Whether a certificate exists on disk for this domain.
    pub fn has_certificate(&self) -> bool {
        self.issued_at.is_some()
    }
}
