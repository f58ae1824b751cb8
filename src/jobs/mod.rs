// Built-in scheduled jobs.

pub mod backup;

pub use backup::{BackupJob, BackupReport};

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::cert_manager::CertificateManager;
use crate::config::AppConfig;
use crate::error::{PanelError, Result};
use crate::health::HealthSampler;
use crate::models::NotificationKind;
use crate::notifier::Notifier;
use crate::scheduler::{Scheduler, handler};

pub const HEALTH_SAMPLE: &str = "health-sample";
pub const BACKUP: &str = "backup";
pub const CERTIFICATE_RENEWAL: &str = "certificate-renewal";

/// Components the built-in jobs act on.
pub struct JobDeps {
    pub sampler: Arc<HealthSampler>,
    pub backup: Arc<BackupJob>,
    pub certificates: Arc<CertificateManager>,
    pub notifier: Arc<Notifier>,
}

pub fn register_default_jobs(
    scheduler: &Scheduler,
    config: &AppConfig,
    deps: JobDeps,
) -> Result<()> {
    let budget = Duration::from_secs(config.schedule.job_budget_secs);

    let sampler = deps.sampler;
    scheduler.register(
        HEALTH_SAMPLE,
        &config.schedule.health_sample,
        budget,
        handler(move || {
            let sampler = sampler.clone();
            async move {
                let report = sampler.tick().await;
                Ok::<_, PanelError>(format!(
                    "cpu={:?} memory={:?} alerts={}",
                    report.stats.cpu, report.stats.memory, report.alerts_sent
                ))
            }
        }),
    )?;

    let backup = deps.backup;
    let notifier = deps.notifier;
    scheduler.register(
        BACKUP,
        &config.schedule.backup,
        budget,
        handler(move || {
            let backup = backup.clone();
            let notifier = notifier.clone();
            async move {
                let report = backup.run().await?;
                notifier
                    .emit(
                        NotificationKind::Success,
                        "Daily backup completed successfully",
                        json!({
                            "location": backup.location().display().to_string(),
                            "steps": &report.succeeded,
                            "pruned": report.pruned.len(),
                        }),
                    )
                    .await;
                Ok::<_, PanelError>(format!(
                    "{} steps, {} pruned",
                    report.succeeded.len(),
                    report.pruned.len()
                ))
            }
        }),
    )?;

    let certificates = deps.certificates;
    scheduler.register(
        CERTIFICATE_RENEWAL,
        &config.schedule.certificate_renewal,
        budget,
        handler(move || {
            let certificates = certificates.clone();
            async move {
                let renewed = certificates.renew_all().await?;
                Ok::<_, PanelError>(format!("{} certificates checked", renewed.len()))
            }
        }),
    )?;

    Ok(())
}
