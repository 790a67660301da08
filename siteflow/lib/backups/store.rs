use std::fmt::{self, Display};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Pool, QueryBuilder, Sqlite};

use crate::{SiteflowError, SiteflowResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Kind of backup job a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Database dump.
    Db,
    /// Uploaded/user content.
    Uploads,
    /// Repository verification.
    Verify,
    /// Host-level snapshot.
    Snapshot,
    /// Full-system backup.
    System,
    /// Unified whole-site backup; backstops `db` and `uploads` when the
    /// job-specific runs are absent.
    Site,
}

/// Outcome of a backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupHealth {
    /// Fresh and successful.
    Ok,
    /// Stale, or a non-critical job failed.
    Warn,
    /// Missing or last run failed.
    Fail,
}

/// A run record as posted by the backup scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRunIn {
    /// Site name, or `system` for global jobs.
    pub site: String,
    /// Job kind.
    pub job_type: JobType,
    /// Run outcome.
    pub status: BackupHealth,
    /// When the run started (RFC-3339).
    pub started_at: DateTime<Utc>,
    /// When the run ended (RFC-3339).
    pub ended_at: DateTime<Utc>,
    /// Bytes written, when reported.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bytes_written: Option<i64>,
    /// Restic snapshot id, when produced.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub backup_id: Option<String>,
    /// Restic repository path.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub repo: Option<String>,
    /// Error string for failed runs.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// A stored run record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BackupRun {
    /// Row id.
    pub id: i64,
    /// Site name.
    pub site: String,
    /// Job kind, stored lowercase.
    pub job_type: String,
    /// Run outcome, stored lowercase.
    pub status: String,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end.
    pub ended_at: DateTime<Utc>,
    /// Bytes written.
    pub bytes_written: Option<i64>,
    /// Restic snapshot id.
    pub backup_id: Option<String>,
    /// Restic repository path.
    pub repo: Option<String>,
    /// Error string.
    pub error: Option<String>,
    /// Ingest time.
    pub created_at: DateTime<Utc>,
}

/// A restorable point: a successful run with a snapshot id.
#[derive(Debug, Clone, Serialize)]
pub struct RestorePoint {
    /// Site name.
    pub site: String,
    /// Job kind.
    pub job_type: String,
    /// Run start time.
    pub timestamp: DateTime<Utc>,
    /// Restic snapshot id.
    pub backup_id: String,
    /// Restic repository path.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub repo: Option<String>,
}

/// The backup run store over the embedded database.
pub struct BackupStore {
    pool: Pool<Sqlite>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl JobType {
    /// The stored string form of this job type.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Db => "db",
            JobType::Uploads => "uploads",
            JobType::Verify => "verify",
            JobType::Snapshot => "snapshot",
            JobType::System => "system",
            JobType::Site => "site",
        }
    }
}

impl BackupHealth {
    /// The stored string form of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupHealth::Ok => "ok",
            BackupHealth::Warn => "warn",
            BackupHealth::Fail => "fail",
        }
    }
}

impl BackupStore {
    /// Creates a store over an initialized pool.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Validates and stores a run record.
    ///
    /// Ingest is idempotent on `(site, job_type, started_at)`: repeated
    /// posts of the same run return the previously stored row.
    pub async fn record(&self, run: &BackupRunIn) -> SiteflowResult<BackupRun> {
        if run.site.trim().is_empty() {
            return Err(SiteflowError::Validation(
                "backup run site cannot be empty".to_string(),
            ));
        }
        if run.ended_at < run.started_at {
            return Err(SiteflowError::Validation(
                "backup run ended_at must not precede started_at".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO backup_runs
                (site, job_type, status, started_at, ended_at, bytes_written,
                 backup_id, repo, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(site, job_type, started_at) DO NOTHING
            "#,
        )
        .bind(&run.site)
        .bind(run.job_type.as_str())
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(run.bytes_written)
        .bind(&run.backup_id)
        .bind(&run.repo)
        .bind(&run.error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let stored: BackupRun = sqlx::query_as(
            "SELECT * FROM backup_runs WHERE site = ? AND job_type = ? AND started_at = ?",
        )
        .bind(&run.site)
        .bind(run.job_type.as_str())
        .bind(run.started_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    /// Returns run history, newest first, with optional filters.
    pub async fn runs(
        &self,
        site: Option<&str>,
        job_type: Option<JobType>,
        limit: i64,
        offset: i64,
    ) -> SiteflowResult<(Vec<BackupRun>, i64)> {
        let limit = limit.clamp(1, 200);

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM backup_runs WHERE 1=1");
        push_run_filters(&mut count_qb, site, job_type);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new("SELECT * FROM backup_runs WHERE 1=1");
        push_run_filters(&mut qb, site, job_type);
        qb.push(" ORDER BY started_at DESC, id DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset.max(0));

        let rows: Vec<BackupRun> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok((rows, total))
    }

    /// The most recent run for a site and job, optionally restricted to a
    /// status.
    pub async fn last_run(
        &self,
        site: &str,
        job_type: JobType,
        status: Option<BackupHealth>,
    ) -> SiteflowResult<Option<BackupRun>> {
        let mut qb = QueryBuilder::new("SELECT * FROM backup_runs WHERE site = ");
        qb.push_bind(site);
        qb.push(" AND job_type = ");
        qb.push_bind(job_type.as_str());
        if let Some(status) = status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }
        qb.push(" ORDER BY started_at DESC, id DESC LIMIT 1");

        let row: Option<BackupRun> = qb.build_query_as().fetch_optional(&self.pool).await?;
        Ok(row)
    }

    /// All sites with at least one run, ordered by name.
    pub async fn sites(&self) -> SiteflowResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT site FROM backup_runs ORDER BY site")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(site,)| site).collect())
    }

    /// Successful `db`/`uploads` runs with a snapshot id, newest first.
    pub async fn restore_points(&self, site: &str, limit: i64) -> SiteflowResult<Vec<RestorePoint>> {
        let limit = limit.clamp(1, 100);
        let rows: Vec<BackupRun> = sqlx::query_as(
            r#"
            SELECT * FROM backup_runs
            WHERE site = ?
              AND status = 'ok'
              AND backup_id IS NOT NULL
              AND job_type IN ('db', 'uploads')
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(site)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|run| {
                run.backup_id.clone().map(|backup_id| RestorePoint {
                    site: run.site,
                    job_type: run.job_type,
                    timestamp: run.started_at,
                    backup_id,
                    repo: run.repo,
                })
            })
            .collect())
    }

    /// Deletes runs ingested before the retention window.
    pub async fn cleanup(&self, retention_days: i64) -> SiteflowResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(retention_days);
        let result = sqlx::query("DELETE FROM backup_runs WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn push_run_filters(qb: &mut QueryBuilder<'_, Sqlite>, site: Option<&str>, job_type: Option<JobType>) {
    if let Some(site) = site {
        qb.push(" AND site = ");
        qb.push_bind(site.to_string());
    }
    if let Some(job_type) = job_type {
        qb.push(" AND job_type = ");
        qb.push_bind(job_type.as_str());
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for BackupHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
