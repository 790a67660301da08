//! Request and response types for the REST API, and the error → status
//! mapping.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::{
    actions::RouteInfo,
    audit::AuditEntry,
    backups::{BackupRun, RestorePoint},
    health::MonitorStatus,
    provision::SiteTemplate,
    SiteflowError,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Error body returned with every 4xx/5xx.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// HTTP status code.
    pub status: u16,
    /// Stable error kind for clients.
    pub error_kind: &'static str,
    /// Human-readable message.
    pub message: String,
}

/// `?refresh=true` query.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    /// Force a re-poll of the remote host.
    #[serde(default)]
    pub refresh: bool,
}

/// `?domain=` query for route removal.
#[derive(Debug, Deserialize)]
pub struct DomainQuery {
    /// The routed domain.
    pub domain: String,
}

/// `?domain=` query for the site domain update.
#[derive(Debug, Deserialize)]
pub struct SiteDomainQuery {
    /// The new domain.
    pub domain: String,
}

/// Response of a container or site action.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    /// The target acted on.
    pub target: String,
    /// The action performed.
    pub action: String,
    /// Captured output.
    pub output: String,
}

/// Response carrying only a message.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// Human-readable message.
    pub message: String,
}

/// Route addition request body.
#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    /// Domain to route.
    pub domain: String,
    /// Target container.
    pub container: String,
    /// Target port.
    pub port: u16,
}

/// Route list response.
#[derive(Debug, Serialize)]
pub struct RoutesListResponse {
    /// Parsed routes.
    pub routes: Vec<RouteInfo>,
}

/// Route mutation response.
#[derive(Debug, Serialize)]
pub struct RouteResponse {
    /// Whether the mutation succeeded.
    pub success: bool,
    /// Human-readable message.
    pub message: String,
    /// The routed domain.
    pub domain: String,
}

/// Template catalog response.
#[derive(Debug, Serialize)]
pub struct TemplateListResponse {
    /// Available templates.
    pub templates: Vec<SiteTemplate>,
}

/// Git deploy request body.
#[derive(Debug, Deserialize)]
pub struct GitDeployRequest {
    /// Target site.
    pub site: String,
    /// Repository URL (https or git@).
    pub repo_url: String,
    /// Branch to deploy.
    #[serde(default = "default_branch")]
    pub branch: String,
}

/// Pull request body.
#[derive(Debug, Deserialize)]
pub struct PullRequest {
    /// Target site.
    pub site: String,
}

/// Deploy response.
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    /// Target site.
    pub site: String,
    /// `success`.
    pub status: String,
    /// Combined command output.
    pub output: String,
}

/// Uptime monitor listing.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status per monitor name.
    pub monitors: std::collections::BTreeMap<String, MonitorStatus>,
}

/// Monitor creation request body.
#[derive(Debug, Deserialize)]
pub struct CreateMonitorRequest {
    /// Site the monitor probes.
    pub site_name: String,
    /// Domain to probe over HTTPS.
    pub domain: String,
}

/// Monitor mutation response.
#[derive(Debug, Serialize)]
pub struct MonitorResponse {
    /// Whether the mutation succeeded.
    pub success: bool,
    /// Human-readable message.
    pub message: String,
}

/// Audit cleanup response.
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    /// Rows deleted.
    pub deleted: u64,
    /// Human-readable message.
    pub message: String,
}

/// Paginated backup runs.
#[derive(Debug, Serialize)]
pub struct BackupRunsResponse {
    /// Runs, newest first.
    pub runs: Vec<BackupRun>,
    /// Total matching rows.
    pub total: i64,
    /// Limit used.
    pub limit: i64,
    /// Offset used.
    pub offset: i64,
}

/// Backup runs history query.
#[derive(Debug, Default, Deserialize)]
pub struct BackupRunsQuery {
    /// Filter by site.
    #[serde(default)]
    pub site: Option<String>,
    /// Filter by job type.
    #[serde(default)]
    pub job_type: Option<crate::backups::JobType>,
    /// Page size.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Offset.
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Restore points query.
#[derive(Debug, Deserialize)]
pub struct SnapshotsQuery {
    /// Target site.
    pub site: String,
    /// Maximum points returned.
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Restore points response.
#[derive(Debug, Serialize)]
pub struct RestorePointsResponse {
    /// Target site.
    pub site: String,
    /// Restorable points, newest first.
    pub restore_points: Vec<RestorePoint>,
}

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    /// `ok`.
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
}

/// Audit page response, re-exported shape.
#[derive(Debug, Serialize)]
pub struct AuditLogsResponse {
    /// Entries, newest first.
    pub logs: Vec<AuditEntry>,
    /// Total matching rows.
    pub total: i64,
    /// The returned page.
    pub page: u32,
    /// Page size used.
    pub page_size: u32,
    /// Total pages.
    pub total_pages: i64,
}

fn default_branch() -> String {
    "main".to_string()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl SiteflowError {
    /// The HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SiteflowError::Validation(_) => StatusCode::BAD_REQUEST,
            SiteflowError::NotFound(_) => StatusCode::NOT_FOUND,
            SiteflowError::Conflict(_) => StatusCode::CONFLICT,
            SiteflowError::Transport(_) => StatusCode::BAD_GATEWAY,
            SiteflowError::Timeout(_, _) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The stable error kind string exposed to clients.
    pub fn error_kind(&self) -> &'static str {
        match self {
            SiteflowError::Validation(_) => "ValidationError",
            SiteflowError::NotFound(_) => "NotFound",
            SiteflowError::Conflict(_) => "Conflict",
            SiteflowError::Transport(_) => "TransportError",
            SiteflowError::Timeout(_, _) => "Timeout",
            SiteflowError::CommandFailure { .. } => "CommandFailure",
            SiteflowError::Integrity(_) => "IntegrityError",
            SiteflowError::Fatal { .. } => "Fatal",
            _ => "Internal",
        }
    }
}

impl IntoResponse for SiteflowError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorBody {
            status: status.as_u16(),
            error_kind: self.error_kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
