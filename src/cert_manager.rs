// Certificate issuance and renewal through the external ACME client.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::cert_repo::CertRepo;
use crate::config::AppConfig;
use crate::error::{PanelError, Result};
use crate::executor::{CommandExecutor, CommandTemplate};
use crate::models::{CertificateCounts, CertificateRecord, CertificateStatus};
use crate::renderer;
use crate::site_repo::SiteRepo;

pub struct CertificateManager {
    repo: Arc<CertRepo>,
    sites: Arc<SiteRepo>,
    executor: CommandExecutor,
    obtain: CommandTemplate,
    renew: CommandTemplate,
    timeout: Duration,
}

pub fn validate_email(email: &str) -> Result<()> {
    let invalid = || PanelError::Validation(format!("invalid email address {:?}", email));
    if email.is_empty() || email.len() > 254 || email.starts_with('-') {
        return Err(invalid());
    }
    if email
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>' | ',' | ';'))
    {
        return Err(invalid());
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(invalid()),
    }
}

impl CertificateManager {
    pub fn new(
        config: &AppConfig,
        repo: Arc<CertRepo>,
        sites: Arc<SiteRepo>,
        executor: CommandExecutor,
    ) -> Self {
        Self {
            repo,
            sites,
            executor,
            obtain: config.commands.acme_obtain.clone(),
            renew: config.commands.acme_renew.clone(),
            timeout: Duration::from_secs(config.timeouts.certificate_secs),
        }
    }

    /// Requests a certificate for `domain`. The record moves Requested -> Issued | Failed.
    #[instrument(skip(self), fields(manager = "certificates", operation = "obtain"))]
    pub async fn obtain(&self, domain: &str, email: &str) -> Result<CertificateRecord> {
        renderer::validate_domain(domain)?;
        validate_email(email)?;

        // A failed re-request does not remove a certificate issued earlier.
        let issued_at = self.repo.get(domain).await?.and_then(|r| r.issued_at);
        let mut record = CertificateRecord {
            domain: domain.to_string(),
            email: email.to_string(),
            status: CertificateStatus::Requested,
            last_attempt: Utc::now(),
            last_error: None,
            issued_at,
        };
        self.repo.upsert(&record).await?;

        let spec = self
            .obtain
            .render(&[("domain", domain), ("email", email)])?;
        let output = self.executor.run(&spec, Some(self.timeout)).await;

        if !output.success() {
            let err = PanelError::from_output(&output);
            record.status = CertificateStatus::Failed;
            record.last_error = Some(err.to_string());
            self.repo.upsert(&record).await?;
            tracing::warn!(error = %err, domain = %domain, "certificate request failed");
            return Err(err);
        }

        record.status = CertificateStatus::Issued;
        record.issued_at = Some(Utc::now());
        if let Err(e) = self.sites.reload().await {
            // The certificate exists; only the reload to pick it up failed.
            tracing::warn!(error = %e, domain = %domain, "reload after issuance failed");
            record.last_error = Some(format!("issued, but reload failed: {}", e));
        }
        self.repo.upsert(&record).await?;
        tracing::info!(domain = %domain, "certificate issued");
        Ok(record)
    }

    /// One bulk renew call for every domain holding a certificate, including those whose
    /// previous renewal failed. Failures are recorded and left for the next cycle.
    #[instrument(skip(self), fields(manager = "certificates", operation = "renew_all"))]
    pub async fn renew_all(&self) -> Result<Vec<CertificateRecord>> {
        let mut renewing: Vec<CertificateRecord> = self
            .repo
            .list()
            .await?
            .into_iter()
            .filter(CertificateRecord::has_certificate)
            .collect();
        let started = Utc::now();
        for record in &mut renewing {
            record.status = CertificateStatus::Renewing;
            record.last_attempt = started;
            self.repo.upsert(record).await?;
        }

        let spec = self.renew.render(&[])?;
        let output = self.executor.run(&spec, Some(self.timeout)).await;
        let failure = (!output.success()).then(|| PanelError::from_output(&output));

        for record in &mut renewing {
            match &failure {
                None => {
                    record.status = CertificateStatus::Issued;
                    record.last_error = None;
                }
                Some(err) => {
                    record.status = CertificateStatus::Failed;
                    record.last_error = Some(err.to_string());
                }
            }
            self.repo.upsert(record).await?;
        }

        match failure {
            Some(err) => {
                tracing::warn!(error = %err, domains = renewing.len(), "certificate renewal failed");
                Err(err)
            }
            None => {
                tracing::info!(domains = renewing.len(), "certificate renewal check completed");
                Ok(renewing)
            }
        }
    }

    pub async fn get(&self, domain: &str) -> Result<Option<CertificateRecord>> {
        self.repo.get(domain).await
    }

    pub async fn list(&self) -> Result<Vec<CertificateRecord>> {
        self.repo.list().await
    }

    pub async fn counts(&self) -> Result<CertificateCounts> {
        let records = self.repo.list().await?;
        Ok(CertificateCounts {
            issued: records
                .iter()
                .filter(|r| r.status == CertificateStatus::Issued)
                .count(),
            total: records.len(),
        })
    }
}
