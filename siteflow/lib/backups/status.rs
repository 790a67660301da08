use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use crate::{config::BackupThresholds, SiteflowResult};

use super::{BackupHealth, BackupRun, BackupStore, JobType};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Aggregated backup state for one site.
///
/// RPO values are derived on read from the most recent successful run and
/// are `None` when no successful run exists.
#[derive(Debug, Clone, Serialize)]
pub struct SiteBackupStatus {
    /// Site name.
    pub site: String,
    /// Latest db run (or `site` run backstop).
    pub last_db_run: Option<BackupRun>,
    /// Latest uploads run (or `site` run backstop).
    pub last_uploads_run: Option<BackupRun>,
    /// Latest verify run.
    pub last_verify_run: Option<BackupRun>,
    /// Latest snapshot run.
    pub last_snapshot_run: Option<BackupRun>,
    /// Seconds since the last successful db backup.
    pub rpo_seconds_db: Option<i64>,
    /// Seconds since the last successful uploads backup.
    pub rpo_seconds_uploads: Option<i64>,
    /// Derived overall health.
    pub overall_status: BackupHealth,
}

/// Per-site statuses plus the thresholds they were derived under.
#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    /// One status per site with backup records.
    pub sites: Vec<SiteBackupStatus>,
    /// Thresholds in force.
    pub thresholds: BackupThresholds,
}

/// Status of the full-system backup job.
#[derive(Debug, Clone, Serialize)]
pub struct SystemBackupStatus {
    /// Latest system run.
    pub last_system_backup: Option<BackupRun>,
    /// Seconds since the last successful system backup.
    pub rpo_seconds_system: Option<i64>,
    /// Derived overall health.
    pub overall_status: BackupHealth,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes the aggregated backup status for one site.
pub async fn site_status(
    store: &BackupStore,
    site: &str,
    thresholds: &BackupThresholds,
) -> SiteflowResult<SiteBackupStatus> {
    let now = Utc::now();

    let last_site = store.last_run(site, JobType::Site, None).await?;
    let last_db = store.last_run(site, JobType::Db, None).await?;
    let last_uploads = store.last_run(site, JobType::Uploads, None).await?;
    let last_verify = store.last_run(site, JobType::Verify, None).await?;
    let last_snapshot = store.last_run(site, JobType::Snapshot, None).await?;

    // The unified `site` job backstops the job-specific runs.
    let effective_db = last_db.or_else(|| last_site.clone());
    let effective_uploads = last_uploads.or_else(|| last_site.clone());

    let last_site_ok = store.last_run(site, JobType::Site, Some(BackupHealth::Ok)).await?;
    let last_db_ok = store.last_run(site, JobType::Db, Some(BackupHealth::Ok)).await?;
    let last_uploads_ok = store
        .last_run(site, JobType::Uploads, Some(BackupHealth::Ok))
        .await?;

    let effective_db_ok = last_db_ok.or_else(|| last_site_ok.clone());
    let effective_uploads_ok = last_uploads_ok.or(last_site_ok);

    let rpo_seconds_db = effective_db_ok.map(|run| (now - run.ended_at).num_seconds());
    let rpo_seconds_uploads = effective_uploads_ok.map(|run| (now - run.ended_at).num_seconds());

    let overall_status = overall_status(
        now,
        effective_db.as_ref(),
        effective_uploads.as_ref(),
        last_verify.as_ref(),
        last_snapshot.as_ref(),
        thresholds,
    );

    Ok(SiteBackupStatus {
        site: site.to_string(),
        last_db_run: effective_db,
        last_uploads_run: effective_uploads,
        last_verify_run: last_verify,
        last_snapshot_run: last_snapshot,
        rpo_seconds_db,
        rpo_seconds_uploads,
        overall_status,
    })
}

/// Computes statuses for every site with backup records.
pub async fn summary(
    store: &BackupStore,
    thresholds: &BackupThresholds,
) -> SiteflowResult<BackupSummary> {
    let mut sites = Vec::new();
    for site in store.sites().await? {
        if site == "system" {
            continue;
        }
        sites.push(site_status(store, &site, thresholds).await?);
    }
    Ok(BackupSummary {
        sites,
        thresholds: *thresholds,
    })
}

/// Computes the status of the full-system backup job. Warns when the last
/// successful run is older than seven days.
pub async fn system_status(store: &BackupStore) -> SiteflowResult<SystemBackupStatus> {
    let now = Utc::now();
    let last = store.last_run("system", JobType::System, None).await?;
    let rpo = last
        .as_ref()
        .filter(|run| run.status == BackupHealth::Ok.as_str())
        .map(|run| (now - run.ended_at).num_seconds());

    let overall_status = match (&last, rpo) {
        (None, _) => BackupHealth::Fail,
        (Some(run), _) if run.status == BackupHealth::Fail.as_str() => BackupHealth::Fail,
        (_, Some(rpo)) if rpo > 7 * 86_400 => BackupHealth::Warn,
        _ => BackupHealth::Ok,
    };

    Ok(SystemBackupStatus {
        last_system_backup: last,
        rpo_seconds_system: rpo,
        overall_status,
    })
}

/// Derives overall health from the latest runs and the thresholds.
///
/// A required job (db, uploads) that is missing or whose latest run failed
/// is `fail`; stale-but-ok is `warn`. Verify and snapshot only ever degrade
/// to `warn`.
fn overall_status(
    now: DateTime<Utc>,
    last_db: Option<&BackupRun>,
    last_uploads: Option<&BackupRun>,
    last_verify: Option<&BackupRun>,
    last_snapshot: Option<&BackupRun>,
    thresholds: &BackupThresholds,
) -> BackupHealth {
    let mut worst = BackupHealth::Ok;
    let mut raise = |level: BackupHealth| {
        if level > worst {
            worst = level;
        }
    };

    for (run, fresh) in [
        (last_db, ChronoDuration::hours(thresholds.db_fresh_hours)),
        (
            last_uploads,
            ChronoDuration::hours(thresholds.uploads_fresh_hours),
        ),
    ] {
        match run {
            None => raise(BackupHealth::Fail),
            Some(run) if run.status == BackupHealth::Fail.as_str() => raise(BackupHealth::Fail),
            Some(run) if now - run.ended_at > fresh => raise(BackupHealth::Warn),
            Some(_) => {}
        }
    }

    for (run, fresh) in [
        (
            last_verify,
            ChronoDuration::days(thresholds.verify_fresh_days),
        ),
        (
            last_snapshot,
            ChronoDuration::days(thresholds.snapshot_fresh_days),
        ),
    ] {
        match run {
            Some(run) if run.status == BackupHealth::Fail.as_str() => raise(BackupHealth::Warn),
            Some(run) if now - run.ended_at > fresh => raise(BackupHealth::Warn),
            _ => {}
        }
    }

    worst
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
