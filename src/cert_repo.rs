// SQLite store for certificate records: one row per domain, upsert = last write wins.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

use crate::error::{PanelError, Result};
use crate::models::{CertificateRecord, CertificateStatus};

pub struct CertRepo {
    pool: SqlitePool,
}

impl CertRepo {
    /// Connect to SQLite at `path`, create parent dir and DB if missing, enable WAL.
    pub async fn connect(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS certificate_records (
                domain TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                status TEXT NOT NULL,
                last_attempt INTEGER NOT NULL,
                last_error TEXT,
                issued_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(repo = "certificates", operation = "upsert", domain = %record.domain))]
    pub async fn upsert(&self, record: &CertificateRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO certificate_records (domain, email, status, last_attempt, last_error, issued_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(domain) DO UPDATE SET
                email = excluded.email,
                status = excluded.status,
                last_attempt = excluded.last_attempt,
                last_error = excluded.last_error,
                issued_at = excluded.issued_at
            "#,
        )
        .bind(&record.domain)
        .bind(&record.email)
        .bind(record.status.as_str())
        .bind(record.last_attempt.timestamp_millis())
        .bind(&record.last_error)
        .bind(record.issued_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, domain: &str) -> Result<Option<CertificateRecord>> {
        let row = sqlx::query(
            "SELECT domain, email, status, last_attempt, last_error, issued_at FROM certificate_records WHERE domain = $1",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn list(&self) -> Result<Vec<CertificateRecord>> {
        let rows = sqlx::query(
            "SELECT domain, email, status, last_attempt, last_error, issued_at FROM certificate_records ORDER BY domain",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<CertificateRecord> {
    let status: String = row.try_get("status")?;
    let last_attempt_ms: i64 = row.try_get("last_attempt")?;
    let issued_at_ms: Option<i64> = row.try_get("issued_at")?;
    Ok(CertificateRecord {
        domain: row.try_get("domain")?,
        email: row.try_get("email")?,
        status: CertificateStatus::from_str(&status).map_err(PanelError::Validation)?,
        last_attempt: DateTime::<Utc>::from_timestamp_millis(last_attempt_ms).unwrap_or_default(),
        last_error: row.try_get("last_error")?,
        issued_at: issued_at_ms.and_then(DateTime::<Utc>::from_timestamp_millis),
    })
}
