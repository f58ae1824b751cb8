// Virtual host models

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A virtual host as derived from its config file and activation marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    /// File name under the available directory; the slug of the domain.
    pub name: String,
    pub domain: String,
    pub document_root: Option<PathBuf>,
    pub php_enabled: bool,
    pub ssl_enabled: bool,
    pub enabled: bool,
    pub config_path: PathBuf,
    /// Set when the config could not be parsed; the other derived fields are then defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

/// Validated input for `SiteRepo::create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSite {
    pub name: String,
    pub domain: String,
    pub document_root: PathBuf,
    pub php_enabled: bool,
    pub ssl_enabled: bool,
}

/// Result of a successful create-site call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSite {
    pub site: Site,
    pub index_created: bool,
    /// Error text when SSL was requested but the certificate could not be obtained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_error: Option<String>,
}
