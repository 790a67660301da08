use std::fmt::{self, Display};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Pool, QueryBuilder, Sqlite};

use crate::SiteflowResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of action an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// `docker start` on one container.
    ContainerStart,
    /// `docker stop` on one container.
    ContainerStop,
    /// `docker restart` on one container.
    ContainerRestart,
    /// Log tail capture for one container.
    ContainerLogs,
    /// Reverse-proxy config validate + reload.
    CaddyReload,
    /// Compose up for a site.
    SiteStart,
    /// Compose down for a site.
    SiteStop,
    /// Compose down + up for a site.
    SiteRestart,
    /// Transactional site creation.
    SiteProvision,
    /// Site teardown.
    SiteDeprovision,
    /// Site configuration change (e.g. DOMAIN update).
    SiteConfig,
    /// Proxy route added.
    RouteAdd,
    /// Proxy route removed.
    RouteRemove,
    /// Backup run ingested.
    BackupRun,
    /// Site restored from a snapshot.
    SiteRestore,
    /// Deploy from a git repository.
    DeployGit,
    /// Deploy from an uploaded archive.
    DeployUpload,
    /// Deploy from an uploaded folder.
    DeployFolder,
    /// Fast-forward pull of a configured deployment.
    DeployPull,
}

/// The kind of target an action operated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// A single container.
    Container,
    /// A site directory.
    Site,
    /// The reverse proxy.
    Caddy,
    /// A proxy route.
    Route,
    /// The whole system.
    System,
}

/// Terminal or pending status of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The action completed.
    Success,
    /// The action failed.
    Failure,
    /// The action is still running; finalized before the handler returns.
    Pending,
}

/// A stored audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Strictly increasing identifier.
    pub id: i64,
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Action kind.
    pub action_type: String,
    /// Target kind.
    pub target_type: String,
    /// Target name.
    pub target_name: String,
    /// Entry status.
    pub status: String,
    /// Captured output, truncated to the configured cap.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output: Option<String>,
    /// Error string for failures.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    /// Structured metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Wall-clock duration of the action, milliseconds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_ms: Option<f64>,
}

/// Filters accepted by [`AuditStore::query`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    /// 1-based page number.
    #[serde(default)]
    pub page: Option<u32>,
    /// Page size, capped at 200.
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Exact action type.
    #[serde(default)]
    pub action_type: Option<String>,
    /// Exact target type.
    #[serde(default)]
    pub target_type: Option<String>,
    /// Substring match on target name.
    #[serde(default)]
    pub target_name: Option<String>,
    /// Exact status.
    #[serde(default)]
    pub status: Option<String>,
    /// Entries at or after this instant.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Entries at or before this instant.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

/// One page of audit entries, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    /// Entries ordered `timestamp DESC, id DESC`.
    pub logs: Vec<AuditEntry>,
    /// Total rows matching the filter.
    pub total: i64,
    /// The returned page.
    pub page: u32,
    /// The page size used.
    pub page_size: u32,
    /// Total pages for the filter.
    pub total_pages: i64,
}

/// Parameters for a new audit entry.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    /// Action kind.
    pub action_type: ActionType,
    /// Target kind.
    pub target_type: TargetType,
    /// Target name.
    pub target_name: String,
    /// Initial status.
    pub status: ActionStatus,
    /// Captured output.
    pub output: Option<String>,
    /// Error string.
    pub error_message: Option<String>,
    /// Structured metadata; must be a JSON object.
    pub metadata: serde_json::Value,
    /// Duration in milliseconds, when already known.
    pub duration_ms: Option<f64>,
}

/// The audit store over the embedded database.
pub struct AuditStore {
    pool: Pool<Sqlite>,
    max_output_length: usize,
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: i64,
    timestamp: DateTime<Utc>,
    action_type: String,
    target_type: String,
    target_name: String,
    status: String,
    output: Option<String>,
    error_message: Option<String>,
    metadata_json: Option<String>,
    duration_ms: Option<f64>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ActionType {
    /// The stored string form of this action type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ContainerStart => "container_start",
            ActionType::ContainerStop => "container_stop",
            ActionType::ContainerRestart => "container_restart",
            ActionType::ContainerLogs => "container_logs",
            ActionType::CaddyReload => "caddy_reload",
            ActionType::SiteStart => "site_start",
            ActionType::SiteStop => "site_stop",
            ActionType::SiteRestart => "site_restart",
            ActionType::SiteProvision => "site_provision",
            ActionType::SiteDeprovision => "site_deprovision",
            ActionType::SiteConfig => "site_config",
            ActionType::RouteAdd => "route_add",
            ActionType::RouteRemove => "route_remove",
            ActionType::BackupRun => "backup_run",
            ActionType::SiteRestore => "site_restore",
            ActionType::DeployGit => "deploy_git",
            ActionType::DeployUpload => "deploy_upload",
            ActionType::DeployFolder => "deploy_folder",
            ActionType::DeployPull => "deploy_pull",
        }
    }
}

impl TargetType {
    /// The stored string form of this target type.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Container => "container",
            TargetType::Site => "site",
            TargetType::Caddy => "caddy",
            TargetType::Route => "route",
            TargetType::System => "system",
        }
    }
}

impl ActionStatus {
    /// The stored string form of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Success => "success",
            ActionStatus::Failure => "failure",
            ActionStatus::Pending => "pending",
        }
    }
}

impl AuditStore {
    /// Creates a store over an initialized pool.
    pub fn new(pool: Pool<Sqlite>, max_output_length: usize) -> Self {
        Self {
            pool,
            max_output_length,
        }
    }

    /// Appends an entry and returns its id.
    pub async fn append(&self, entry: NewAuditEntry) -> SiteflowResult<i64> {
        let output = entry.output.map(|o| self.truncate(o));
        let metadata_json = if entry.metadata.is_null() {
            None
        } else {
            Some(serde_json::to_string(&entry.metadata)?)
        };

        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs
                (timestamp, action_type, target_type, target_name, status,
                 output, error_message, metadata_json, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now())
        .bind(entry.action_type.as_str())
        .bind(entry.target_type.as_str())
        .bind(&entry.target_name)
        .bind(entry.status.as_str())
        .bind(output)
        .bind(entry.error_message)
        .bind(metadata_json)
        .bind(entry.duration_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Finalizes a `pending` entry to a terminal status. Entries already
    /// terminal are left untouched (append-only contract).
    pub async fn finalize(
        &self,
        id: i64,
        status: ActionStatus,
        output: Option<String>,
        error_message: Option<String>,
        duration_ms: Option<f64>,
    ) -> SiteflowResult<()> {
        let output = output.map(|o| self.truncate(o));
        sqlx::query(
            r#"
            UPDATE audit_logs
            SET status = ?, output = ?, error_message = ?, duration_ms = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(output)
        .bind(error_message)
        .bind(duration_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Queries entries with filters and pagination, newest first.
    pub async fn query(&self, filter: &AuditQuery) -> SiteflowResult<AuditPage> {
        let page = filter.page.unwrap_or(1).max(1);
        let page_size = filter.page_size.unwrap_or(50).clamp(1, 200);
        let offset = (page as i64 - 1) * page_size as i64;

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs WHERE 1=1");
        push_filters(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new(
            "SELECT id, timestamp, action_type, target_type, target_name, status, \
             output, error_message, metadata_json, duration_ms FROM audit_logs WHERE 1=1",
        );
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ");
        qb.push_bind(page_size as i64);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows: Vec<AuditRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let logs = rows.into_iter().map(AuditEntry::from).collect();

        let total_pages = (total + page_size as i64 - 1) / page_size as i64;
        Ok(AuditPage {
            logs,
            total,
            page,
            page_size,
            total_pages,
        })
    }

    /// Deletes entries older than the retention window.
    pub async fn cleanup(&self, older_than_days: i64) -> SiteflowResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days);
        let result = sqlx::query("DELETE FROM audit_logs WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        tracing::info!(deleted, older_than_days, "cleaned up audit entries");
        Ok(deleted)
    }

    fn truncate(&self, mut value: String) -> String {
        if value.len() > self.max_output_length {
            let mut cut = self.max_output_length;
            while !value.is_char_boundary(cut) {
                cut -= 1;
            }
            value.truncate(cut);
            value.push_str("... [truncated]");
        }
        value
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &AuditQuery) {
    if let Some(action_type) = &filter.action_type {
        qb.push(" AND action_type = ");
        qb.push_bind(action_type.clone());
    }
    if let Some(target_type) = &filter.target_type {
        qb.push(" AND target_type = ");
        qb.push_bind(target_type.clone());
    }
    if let Some(target_name) = &filter.target_name {
        qb.push(" AND target_name LIKE ");
        qb.push_bind(format!("%{target_name}%"));
    }
    if let Some(status) = &filter.status {
        qb.push(" AND status = ");
        qb.push_bind(status.clone());
    }
    if let Some(start_date) = &filter.start_date {
        qb.push(" AND timestamp >= ");
        qb.push_bind(*start_date);
    }
    if let Some(end_date) = &filter.end_date {
        qb.push(" AND timestamp <= ");
        qb.push_bind(*end_date);
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        let metadata = row
            .metadata_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(serde_json::Value::Null);
        AuditEntry {
            id: row.id,
            timestamp: row.timestamp,
            action_type: row.action_type,
            target_type: row.target_type,
            target_name: row.target_name,
            status: row.status,
            output: row.output,
            error_message: row.error_message,
            metadata,
            duration_ms: row.duration_ms,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::store::init_db;

    use super::*;

    async fn store() -> (tempfile::TempDir, AuditStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_db(&dir.path().join("test.db")).await.unwrap();
        (dir, AuditStore::new(pool, 64))
    }

    fn entry(target: &str, status: ActionStatus) -> NewAuditEntry {
        NewAuditEntry {
            action_type: ActionType::SiteStart,
            target_type: TargetType::Site,
            target_name: target.to_string(),
            status,
            output: None,
            error_message: None,
            metadata: serde_json::Value::Null,
            duration_ms: None,
        }
    }

    #[tokio::test]
    async fn test_append_ids_strictly_increase() {
        let (_dir, store) = store().await;
        let mut last = 0;
        for i in 0..5 {
            let id = store.append(entry(&format!("site-{i}"), ActionStatus::Success)).await.unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[tokio::test]
    async fn test_query_order_and_pagination() {
        let (_dir, store) = store().await;
        for i in 0..7 {
            store
                .append(entry(&format!("site-{i}"), ActionStatus::Success))
                .await
                .unwrap();
        }
        let page = store
            .query(&AuditQuery {
                page: Some(1),
                page_size: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.logs.len(), 3);
        // Newest first; the first row's id bounds all stored ids.
        assert!(page.logs[0].id > page.logs[1].id);
        assert_eq!(page.logs[0].target_name, "site-6");
    }

    #[tokio::test]
    async fn test_filters() {
        let (_dir, store) = store().await;
        store.append(entry("blog", ActionStatus::Success)).await.unwrap();
        store.append(entry("shop", ActionStatus::Failure)).await.unwrap();

        let page = store
            .query(&AuditQuery {
                status: Some("failure".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.logs[0].target_name, "shop");

        let page = store
            .query(&AuditQuery {
                target_name: Some("blo".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.logs[0].target_name, "blog");
    }

    #[tokio::test]
    async fn test_finalize_only_touches_pending() {
        let (_dir, store) = store().await;
        let pending = store.append(entry("blog", ActionStatus::Pending)).await.unwrap();
        let done = store.append(entry("blog", ActionStatus::Success)).await.unwrap();

        store
            .finalize(pending, ActionStatus::Failure, None, Some("boom".to_string()), Some(12.0))
            .await
            .unwrap();
        store
            .finalize(done, ActionStatus::Failure, None, None, None)
            .await
            .unwrap();

        let page = store.query(&AuditQuery::default()).await.unwrap();
        let by_id = |id: i64| page.logs.iter().find(|l| l.id == id).unwrap();
        assert_eq!(by_id(pending).status, "failure");
        assert_eq!(by_id(pending).error_message.as_deref(), Some("boom"));
        // The already-terminal entry kept its status.
        assert_eq!(by_id(done).status, "success");
    }

    #[tokio::test]
    async fn test_output_truncated_to_cap() {
        let (_dir, store) = store().await;
        let mut long_entry = entry("blog", ActionStatus::Success);
        long_entry.output = Some("x".repeat(1000));
        store.append(long_entry).await.unwrap();

        let page = store.query(&AuditQuery::default()).await.unwrap();
        let output = page.logs[0].output.as_ref().unwrap();
        assert!(output.len() <= 64 + "... [truncated]".len());
        assert!(output.ends_with("... [truncated]"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_rows() {
        let (_dir, store) = store().await;
        store.append(entry("blog", ActionStatus::Success)).await.unwrap();
        // Nothing is older than 1 day.
        assert_eq!(store.cleanup(1).await.unwrap(), 0);
        // Everything is older than -1 days (cutoff in the future).
        assert_eq!(store.cleanup(-1).await.unwrap(), 1);
    }
}
