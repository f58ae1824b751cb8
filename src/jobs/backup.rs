// Daily backup: independent archive steps, optional database dump, retention pruning.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::instrument;

use crate::config::{AppConfig, ArchiveSource};
use crate::error::{PanelError, Result};
use crate::executor::{CommandExecutor, CommandTemplate};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    pub succeeded: Vec<String>,
    /// (step, error message)
    pub failed: Vec<(String, String)>,
    pub pruned: Vec<PathBuf>,
    /// Files written by the succeeded steps.
    pub files: Vec<PathBuf>,
}

/// Per-run file stamp, fine enough that a manual re-run never overwrites a scheduled one.
const STAMP_FORMAT: &str = "%Y-%m-%dT%H%M%S%.3fZ";

pub struct BackupJob {
    executor: CommandExecutor,
    location: PathBuf,
    retention: Duration,
    archives: Vec<ArchiveSource>,
    archive_command: CommandTemplate,
    database_dump: Option<CommandTemplate>,
}

impl BackupJob {
    pub fn new(config: &AppConfig, executor: CommandExecutor) -> Self {
        Self {
            executor,
            location: config.backup.location.clone(),
            retention: Duration::from_secs(u64::from(config.backup.retention_days) * 24 * 60 * 60),
            archives: config.backup.archives.clone(),
            archive_command: config.backup.archive_command.clone(),
            database_dump: config.backup.database_dump.clone(),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Runs every step, then prunes. Any failed step turns the run into `PartialFailure`;
    /// the report is logged either way.
    #[instrument(skip(self), fields(job = "backup", operation = "run"))]
    pub async fn run(&self) -> Result<BackupReport> {
        tokio::fs::create_dir_all(&self.location).await?;
        let stamp = Utc::now().format(STAMP_FORMAT).to_string();
        let mut report = BackupReport::default();

        for archive in &self.archives {
            let step = format!("archive:{}", archive.name);
            let output = self
                .location
                .join(format!("{}-{}.tar.gz", archive.name, stamp));
            let result = self.archive(archive, &output).await;
            record(&mut report, step, output, result);
        }

        if let Some(dump) = &self.database_dump {
            let output = self.location.join(format!("database-{}.sql", stamp));
            let result = self.dump(dump, &output).await;
            record(&mut report, "database".to_string(), output, result);
        }

        match self.prune().await {
            Ok(pruned) => report.pruned = pruned,
            Err(e) => report.failed.push(("prune".into(), e.to_string())),
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            pruned = report.pruned.len(),
            "backup run finished"
        );
        if report.failed.is_empty() {
            Ok(report)
        } else {
            Err(PanelError::PartialFailure {
                failed: report
                    .failed
                    .iter()
                    .map(|(step, e)| format!("{}: {}", step, e))
                    .collect(),
                succeeded: report.succeeded,
            })
        }
    }

    async fn archive(&self, archive: &ArchiveSource, output: &Path) -> Result<()> {
        let out = output.to_string_lossy();
        let source = archive.path.to_string_lossy();
        let spec = self
            .archive_command
            .render(&[("output", out.as_ref()), ("source", source.as_ref())])?;
        // Backups are unbounded; the scheduler's job budget is the only deadline.
        self.executor.run(&spec, None).await.into_result()?;
        Ok(())
    }

    async fn dump(&self, template: &CommandTemplate, output: &Path) -> Result<()> {
        let spec = template.render(&[])?.with_stdout_path(output);
        let result = self.executor.run(&spec, None).await.into_result();
        if result.is_err() {
            // A failed dump leaves a truncated file behind.
            let _ = tokio::fs::remove_file(output).await;
        }
        result.map(|_| ())
    }

    /// Deletes regular files in the backup location older than the retention window.
    pub async fn prune(&self) -> Result<Vec<PathBuf>> {
        let cutoff = SystemTime::now()
            .checked_sub(self.retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.location).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified()?;
            if modified < cutoff {
                let path = entry.path();
                tokio::fs::remove_file(&path).await?;
                tracing::debug!(path = %path.display(), "expired backup removed");
                removed.push(path);
            }
        }
        removed.sort();
        Ok(removed)
    }
}

fn record(report: &mut BackupReport, step: String, output: PathBuf, result: Result<()>) {
    match result {
        Ok(()) => {
            report.succeeded.push(step);
            report.files.push(output);
        }
        Err(e) => {
            tracing::warn!(step = %step, error = %e, "backup step failed");
            report.failed.push((step, e.to_string()));
        }
    }
}
