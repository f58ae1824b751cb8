// Composition layer behind the HTTP surface: validates input, calls the repositories,
// shapes results as {success, data | error} and emits notifications on state changes.

mod response;

pub use response::{ApiError, ApiResponse};

use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::instrument;

use crate::cert_manager::CertificateManager;
use crate::config::AppConfig;
use crate::error::{PanelError, Result};
use crate::executor::{CommandExecutor, CommandTemplate};
use crate::health::HealthHandle;
use crate::models::{
    CertificateRecord, CreatedSite, DatabaseStats, MetricHistory, NewSite, NotificationKind,
    PanelEvent, PanelStats, Site, SiteCounts, SystemSummary, SystemUpdate,
};
use crate::notifier::Notifier;
use crate::renderer::{self, VhostSpec};
use crate::site_repo::SiteRepo;

/// Schemas every MySQL server has; not counted as user databases.
const SYSTEM_DATABASES: [&str; 4] = ["information_schema", "mysql", "performance_schema", "sys"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSiteRequest {
    #[serde(default)]
    pub domain: String,
    #[serde(default, alias = "directory")]
    pub document_root: Option<PathBuf>,
    #[serde(default, alias = "phpEnabled")]
    pub php: bool,
    #[serde(default, alias = "sslEnabled")]
    pub ssl: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObtainCertificateRequest {
    #[serde(default)]
    pub domain: String,
    /// Falls back to the configured ACME contact.
    #[serde(default)]
    pub email: Option<String>,
}

pub struct OrchestratorDeps {
    pub sites: Arc<SiteRepo>,
    pub certificates: Arc<CertificateManager>,
    pub health: HealthHandle,
    pub notifier: Arc<Notifier>,
    pub executor: CommandExecutor,
}

pub struct Orchestrator {
    sites: Arc<SiteRepo>,
    certificates: Arc<CertificateManager>,
    health: HealthHandle,
    notifier: Arc<Notifier>,
    executor: CommandExecutor,
    web_root: PathBuf,
    php_fpm_socket: String,
    acme_email: Option<String>,
    database_list: Option<CommandTemplate>,
    probe_timeout: Duration,
    started: Instant,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, deps: OrchestratorDeps) -> Self {
        Self {
            sites: deps.sites,
            certificates: deps.certificates,
            health: deps.health,
            notifier: deps.notifier,
            executor: deps.executor,
            web_root: config.paths.web_root.clone(),
            php_fpm_socket: config.paths.php_fpm_socket.clone(),
            acme_email: config.alerts.acme_email.clone(),
            database_list: config.commands.database_list.clone(),
            probe_timeout: Duration::from_secs(config.timeouts.probe_secs),
            started: Instant::now(),
        }
    }

    pub async fn create_site(&self, req: CreateSiteRequest) -> ApiResponse<CreatedSite> {
        self.create_site_inner(req).await.into()
    }

    pub async fn toggle_site(&self, name: &str, enabled: bool) -> ApiResponse<Site> {
        self.toggle_site_inner(name, enabled).await.into()
    }

    pub async fn delete_site(&self, name: &str) -> ApiResponse<serde_json::Value> {
        self.delete_site_inner(name).await.into()
    }

    pub async fn obtain_certificate(
        &self,
        req: ObtainCertificateRequest,
    ) -> ApiResponse<CertificateRecord> {
        self.obtain_certificate_inner(req).await.into()
    }

    pub async fn get_stats(&self) -> ApiResponse<PanelStats> {
        self.get_stats_inner().await.into()
    }

    pub async fn list_sites(&self) -> ApiResponse<Vec<Site>> {
        self.sites.list().await.into()
    }

    /// Snapshot sent to a push-channel observer before live events.
    pub fn initial_update(&self) -> SystemUpdate {
        SystemUpdate::Initial(self.health.snapshot())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.notifier.subscribe()
    }

    #[instrument(skip(self, req), fields(operation = "create_site", domain = %req.domain))]
    async fn create_site_inner(&self, req: CreateSiteRequest) -> Result<CreatedSite> {
        let domain = req.domain.trim().to_ascii_lowercase();
        renderer::validate_domain(&domain)?;
        let name = renderer::site_slug(&domain);
        let document_root = req
            .document_root
            .unwrap_or_else(|| self.web_root.join(&name));
        renderer::validate_document_root(&document_root)?;

        let rendered = renderer::render_vhost(&VhostSpec {
            domain: &domain,
            document_root: &document_root,
            php_enabled: req.php,
            php_fpm_socket: &self.php_fpm_socket,
        })?;
        let index_page = renderer::render_index_page(&domain, &document_root, req.php, req.ssl);
        let new_site = NewSite {
            name: name.clone(),
            domain: domain.clone(),
            document_root,
            php_enabled: req.php,
            ssl_enabled: req.ssl,
        };
        let (mut site, index_created) = self.sites.create(&new_site, &rendered, &index_page).await?;

        let mut certificate_error = None;
        if req.ssl {
            match &self.acme_email {
                Some(email) => match self.certificates.obtain(&domain, email).await {
                    Ok(_) => match self.sites.get(&name).await {
                        Ok(Some(updated)) => site = updated,
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, site = %name, "cannot re-read site after issuance");
                        }
                    },
                    Err(e) => {
                        self.notifier
                            .emit(
                                NotificationKind::Error,
                                format!("SSL certificate request failed for {}", domain),
                                json!({ "domain": domain, "error": e.to_string() }),
                            )
                            .await;
                        certificate_error = Some(e.to_string());
                    }
                },
                None => {
                    tracing::warn!(domain = %domain, "ssl requested but no ACME contact configured");
                    certificate_error = Some("no ACME contact email configured".into());
                }
            }
        }

        self.notifier
            .emit(
                NotificationKind::Success,
                format!("Website {} created successfully", domain),
                json!({
                    "domain": domain,
                    "documentRoot": site.document_root,
                    "php": req.php,
                    "ssl": req.ssl,
                }),
            )
            .await;

        Ok(CreatedSite {
            site,
            index_created,
            certificate_error,
        })
    }

    #[instrument(skip(self), fields(operation = "toggle_site"))]
    async fn toggle_site_inner(&self, name: &str, enabled: bool) -> Result<Site> {
        let name = name.trim();
        let site = self.sites.set_enabled(name, enabled).await?;
        self.notifier
            .emit(
                NotificationKind::Success,
                format!(
                    "Website {} {}",
                    site.domain,
                    if enabled { "enabled" } else { "disabled" }
                ),
                json!({ "site": site.name, "enabled": enabled }),
            )
            .await;
        Ok(site)
    }

    #[instrument(skip(self), fields(operation = "delete_site"))]
    async fn delete_site_inner(&self, name: &str) -> Result<serde_json::Value> {
        let name = name.trim();
        let removed = self.sites.delete(name).await?;
        if removed {
            self.notifier
                .emit(
                    NotificationKind::Success,
                    format!("Website {} deleted", name),
                    json!({ "site": name }),
                )
                .await;
        }
        Ok(json!({ "site": name, "removed": removed }))
    }

    #[instrument(skip(self, req), fields(operation = "obtain_certificate", domain = %req.domain))]
    async fn obtain_certificate_inner(
        &self,
        req: ObtainCertificateRequest,
    ) -> Result<CertificateRecord> {
        let domain = req.domain.trim().to_ascii_lowercase();
        renderer::validate_domain(&domain)?;
        let email = req
            .email
            .filter(|e| !e.trim().is_empty())
            .or_else(|| self.acme_email.clone())
            .ok_or_else(|| PanelError::Validation("email is required".into()))?;
        if self.sites.get(&renderer::site_slug(&domain)).await?.is_none() {
            return Err(PanelError::NotFound(format!("site {}", domain)));
        }

        match self.certificates.obtain(&domain, email.trim()).await {
            Ok(record) => {
                self.notifier
                    .emit(
                        NotificationKind::Success,
                        format!("SSL certificate obtained for {}", domain),
                        json!({ "domain": domain }),
                    )
                    .await;
                Ok(record)
            }
            Err(e) => {
                self.notifier
                    .emit(
                        NotificationKind::Error,
                        format!("SSL certificate request failed for {}", domain),
                        json!({ "domain": domain, "error": e.to_string() }),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn get_stats_inner(&self) -> Result<PanelStats> {
        let sites = self.sites.list().await?;
        let snapshot = self.health.snapshot();
        Ok(PanelStats {
            system: SystemSummary {
                cpu: self.health.latest_cpu().unwrap_or(0.0),
                memory: self.health.latest_memory_percent().unwrap_or(0.0),
                disk_usage: snapshot.disk.as_ref().map(|d| d.usage_percent),
                uptime_secs: self.started.elapsed().as_secs(),
            },
            sites: SiteCounts {
                active: sites.iter().filter(|s| s.enabled).count(),
                total: sites.len(),
            },
            ssl: self.certificates.counts().await?,
            databases: self.database_stats().await,
            services: snapshot.services,
            history: MetricHistory {
                cpu: snapshot.cpu,
                memory: snapshot.memory,
            },
        })
    }

    /// Best-effort: `None` when the tool is unset or fails.
    async fn database_stats(&self) -> Option<DatabaseStats> {
        let spec = self.database_list.as_ref()?.render(&[]).ok()?;
        let output = self.executor.run(&spec, Some(self.probe_timeout)).await;
        if !output.success() {
            tracing::debug!(error = %PanelError::from_output(&output), "database listing failed");
            return None;
        }
        Some(DatabaseStats {
            total: count_user_databases(&output.stdout),
        })
    }
}

fn count_user_databases(listing: &str) -> usize {
    listing
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty() && name != &"Database")
        .filter(|name| !SYSTEM_DATABASES.contains(name))
        .count()
}
