//! HTTP request handlers for the REST API.
//!
//! Handlers stay thin: validate, delegate to the engine/provisioner/stores,
//! shape the response. Errors convert through `SiteflowError`'s
//! `IntoResponse` impl into `{status, error_kind, message}` bodies.

use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};

use crate::{
    actions::{ContainerAction, SiteAction},
    audit::{ActionStatus, ActionType, AuditQuery, TargetType},
    backups::{self, BackupRun, BackupRunIn, BackupSummary, SystemBackupStatus},
    models::{GraphResponse, SitesResponse},
    provision::{
        DeprovisionRequest, DeprovisionResponse, DetectRequest, DetectResponse, ProvisionRequest,
        ProvisionResponse,
    },
    SiteflowError, SiteflowResult,
};

use super::{state::ServerState, types::*};

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Handler for GET /healthz
pub async fn healthz_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Handler for GET /api/sites/
pub async fn list_sites_handler(
    State(state): State<ServerState>,
    Query(query): Query<RefreshQuery>,
) -> SiteflowResult<Json<SitesResponse>> {
    let sites = state.overview.sites(query.refresh).await?;
    Ok(Json((*sites).clone()))
}

/// Handler for POST /api/sites/{site}/{action}
pub async fn site_action_handler(
    State(state): State<ServerState>,
    Path((site, action)): Path<(String, String)>,
) -> SiteflowResult<Json<ActionResponse>> {
    let action = SiteAction::parse(&action)?;
    let output = state.engine.site_action(&site, action).await?;
    state.monitor.force_broadcast();
    Ok(Json(ActionResponse {
        target: site,
        action: action.as_str().to_string(),
        output,
    }))
}

/// Handler for POST /api/sites/containers/{name}/{action}
pub async fn container_action_handler(
    State(state): State<ServerState>,
    Path((container, action)): Path<(String, String)>,
) -> SiteflowResult<Json<ActionResponse>> {
    let action = ContainerAction::parse(&action)?;
    let output = state.engine.container_action(&container, action).await?;
    if action != ContainerAction::Logs {
        state.monitor.force_broadcast();
    }
    Ok(Json(ActionResponse {
        target: container,
        action: action.as_str().to_string(),
        output,
    }))
}

/// Handler for POST /api/sites/caddy/reload
pub async fn caddy_reload_handler(
    State(state): State<ServerState>,
) -> SiteflowResult<Json<MessageResponse>> {
    let output = state.engine.reload_caddy().await?;
    Ok(Json(MessageResponse { message: output }))
}

/// Handler for PUT /api/sites/{site}/domain
pub async fn set_site_domain_handler(
    State(state): State<ServerState>,
    Path(site): Path<String>,
    Query(query): Query<SiteDomainQuery>,
) -> SiteflowResult<Json<MessageResponse>> {
    let message = state.engine.set_site_domain(&site, &query.domain).await?;
    Ok(Json(MessageResponse { message }))
}

/// Handler for GET /api/graph/
pub async fn graph_handler(
    State(state): State<ServerState>,
    Query(query): Query<RefreshQuery>,
) -> SiteflowResult<Json<GraphResponse>> {
    let graph = state.overview.graph(query.refresh).await?;
    Ok(Json(graph))
}

/// Handler for GET /api/routes/
pub async fn list_routes_handler(
    State(state): State<ServerState>,
) -> SiteflowResult<Json<RoutesListResponse>> {
    let routes = state.engine.list_routes().await?;
    Ok(Json(RoutesListResponse { routes }))
}

/// Handler for POST /api/routes/
pub async fn add_route_handler(
    State(state): State<ServerState>,
    Json(request): Json<RouteRequest>,
) -> SiteflowResult<Json<RouteResponse>> {
    let message = state
        .engine
        .add_route(&request.domain, &request.container, request.port)
        .await?;
    Ok(Json(RouteResponse {
        success: true,
        message,
        domain: request.domain,
    }))
}

/// Handler for DELETE /api/routes/?domain=
pub async fn remove_route_handler(
    State(state): State<ServerState>,
    Query(query): Query<DomainQuery>,
) -> SiteflowResult<Json<RouteResponse>> {
    let message = state.engine.remove_route(&query.domain).await?;
    Ok(Json(RouteResponse {
        success: true,
        message,
        domain: query.domain,
    }))
}

/// Handler for GET /api/provision/templates
pub async fn provision_templates_handler() -> Json<TemplateListResponse> {
    Json(TemplateListResponse {
        templates: crate::provision::template_catalog(),
    })
}

/// Handler for POST /api/provision/detect
pub async fn provision_detect_handler(
    State(state): State<ServerState>,
    Json(request): Json<DetectRequest>,
) -> SiteflowResult<Json<DetectResponse>> {
    let response = state.provisioner.detect_project_type(&request).await?;
    Ok(Json(response))
}

/// Handler for POST /api/provision/
pub async fn provision_create_handler(
    State(state): State<ServerState>,
    Json(request): Json<ProvisionRequest>,
) -> SiteflowResult<Json<ProvisionResponse>> {
    let response = state.provisioner.provision(&request).await?;
    state.monitor.force_broadcast();
    Ok(Json(response))
}

/// Handler for DELETE /api/provision/
pub async fn provision_delete_handler(
    State(state): State<ServerState>,
    Json(request): Json<DeprovisionRequest>,
) -> SiteflowResult<Json<DeprovisionResponse>> {
    let response = state.provisioner.deprovision(&request).await?;
    state.monitor.force_broadcast();
    Ok(Json(response))
}

/// Handler for POST /api/deploy/github
pub async fn deploy_github_handler(
    State(state): State<ServerState>,
    Json(request): Json<GitDeployRequest>,
) -> SiteflowResult<Json<DeployResponse>> {
    let output = state
        .engine
        .deploy_git(&request.site, &request.repo_url, &request.branch)
        .await?;
    state.monitor.force_broadcast();
    Ok(Json(DeployResponse {
        site: request.site,
        status: "success".to_string(),
        output,
    }))
}

/// Handler for POST /api/deploy/pull
pub async fn deploy_pull_handler(
    State(state): State<ServerState>,
    Json(request): Json<PullRequest>,
) -> SiteflowResult<Json<DeployResponse>> {
    let output = state.engine.deploy_pull(&request.site).await?;
    state.monitor.force_broadcast();
    Ok(Json(DeployResponse {
        site: request.site,
        status: "success".to_string(),
        output,
    }))
}

/// Handler for GET /api/deploy/{site}/status
pub async fn deploy_status_handler(
    State(state): State<ServerState>,
    Path(site): Path<String>,
) -> SiteflowResult<Json<crate::actions::DeployStatus>> {
    let status = state.engine.deploy_status(&site).await?;
    Ok(Json(status))
}

/// Handler for POST /api/deploy/upload (multipart: `site`, one `.zip` file)
pub async fn deploy_upload_handler(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> SiteflowResult<Json<DeployResponse>> {
    let mut site = None;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SiteflowError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("site") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| SiteflowError::Validation(format!("bad site field: {e}")))?;
                site = Some(value);
            }
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload.zip").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| SiteflowError::Validation(format!("bad file field: {e}")))?;
                upload = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let site = site.ok_or_else(|| SiteflowError::Validation("missing site field".to_string()))?;
    let (filename, bytes) =
        upload.ok_or_else(|| SiteflowError::Validation("no file provided".to_string()))?;

    let output = state.engine.deploy_upload(&site, &filename, &bytes).await?;
    state.monitor.force_broadcast();
    Ok(Json(DeployResponse {
        site,
        status: "success".to_string(),
        output,
    }))
}

/// Handler for POST /api/deploy/folder (multipart: `site`, many `files`
/// with relative paths)
pub async fn deploy_folder_handler(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> SiteflowResult<Json<DeployResponse>> {
    let mut site = None;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SiteflowError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("site") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| SiteflowError::Validation(format!("bad site field: {e}")))?;
                site = Some(value);
            }
            Some("files") => {
                let Some(name) = field.file_name().map(str::to_string) else {
                    continue;
                };
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| SiteflowError::Validation(format!("bad file field: {e}")))?;
                files.push((name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let site = site.ok_or_else(|| SiteflowError::Validation("missing site field".to_string()))?;
    let output = state.engine.deploy_folder(&site, &files).await?;
    state.monitor.force_broadcast();
    Ok(Json(DeployResponse {
        site,
        status: "success".to_string(),
        output,
    }))
}

/// Handler for GET /api/health/
pub async fn health_handler(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        monitors: state.uptime.list_monitors().await,
    })
}

/// Handler for POST /api/health/monitors
pub async fn create_monitor_handler(
    State(state): State<ServerState>,
    Json(request): Json<CreateMonitorRequest>,
) -> SiteflowResult<Json<MonitorResponse>> {
    let domain = crate::utils::validate_domain(&request.domain)?;
    state
        .uptime
        .create_monitor(&request.site_name, &format!("https://{domain}"))
        .await?;
    Ok(Json(MonitorResponse {
        success: true,
        message: format!("monitor created for {}", request.site_name),
    }))
}

/// Handler for DELETE /api/health/monitors/{site}
pub async fn delete_monitor_handler(
    State(state): State<ServerState>,
    Path(site): Path<String>,
) -> SiteflowResult<Json<MonitorResponse>> {
    state.uptime.delete_monitor(&site).await?;
    Ok(Json(MonitorResponse {
        success: true,
        message: format!("monitor '{site}' deleted"),
    }))
}

/// Handler for GET /api/audit/logs
pub async fn audit_logs_handler(
    State(state): State<ServerState>,
    Query(filter): Query<AuditQuery>,
) -> SiteflowResult<Json<AuditLogsResponse>> {
    let page = state.audit.query(&filter).await?;
    Ok(Json(AuditLogsResponse {
        logs: page.logs,
        total: page.total,
        page: page.page,
        page_size: page.page_size,
        total_pages: page.total_pages,
    }))
}

/// Handler for POST /api/audit/cleanup
pub async fn audit_cleanup_handler(
    State(state): State<ServerState>,
) -> SiteflowResult<Json<CleanupResponse>> {
    let retention = state.config.storage.audit_retention_days;
    let deleted = state.audit.cleanup(retention).await?;
    let pruned_runs = state.backups.cleanup(retention).await?;
    Ok(Json(CleanupResponse {
        deleted: deleted + pruned_runs,
        message: format!("deleted {deleted} audit entries and {pruned_runs} backup runs"),
    }))
}

/// Handler for POST /api/backups/runs
pub async fn backups_ingest_handler(
    State(state): State<ServerState>,
    Json(run): Json<BackupRunIn>,
) -> SiteflowResult<Json<BackupRun>> {
    let stored = state.backups.record(&run).await?;

    let status = match run.status {
        crate::backups::BackupHealth::Fail => ActionStatus::Failure,
        _ => ActionStatus::Success,
    };
    let duration_ms = (run.ended_at - run.started_at).num_milliseconds() as f64;
    state
        .engine
        .recorder()
        .record(
            ActionType::BackupRun,
            TargetType::Site,
            &run.site,
            status,
            Some(format!("backup {}: {}", run.job_type, run.status)),
            run.error.clone(),
            serde_json::json!({
                "job_type": run.job_type.as_str(),
                "backup_id": run.backup_id,
                "bytes_written": run.bytes_written,
            }),
            Some(duration_ms),
        )
        .await;

    Ok(Json(stored))
}

/// Handler for GET /api/backups/runs
pub async fn backups_runs_handler(
    State(state): State<ServerState>,
    Query(query): Query<BackupRunsQuery>,
) -> SiteflowResult<Json<BackupRunsResponse>> {
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);
    let (runs, total) = state
        .backups
        .runs(query.site.as_deref(), query.job_type, limit, offset)
        .await?;
    Ok(Json(BackupRunsResponse {
        runs,
        total,
        limit: limit.clamp(1, 200),
        offset,
    }))
}

/// Handler for GET /api/backups/summary
pub async fn backups_summary_handler(
    State(state): State<ServerState>,
) -> SiteflowResult<Json<BackupSummary>> {
    let summary = backups::summary(&state.backups, state.overview.thresholds()).await?;
    Ok(Json(summary))
}

/// Handler for GET /api/backups/snapshots
pub async fn backups_snapshots_handler(
    State(state): State<ServerState>,
    Query(query): Query<SnapshotsQuery>,
) -> SiteflowResult<Json<RestorePointsResponse>> {
    let restore_points = state
        .backups
        .restore_points(&query.site, query.limit.unwrap_or(20))
        .await?;
    Ok(Json(RestorePointsResponse {
        site: query.site,
        restore_points,
    }))
}

/// Handler for GET /api/backups/system/status
pub async fn backups_system_status_handler(
    State(state): State<ServerState>,
) -> SiteflowResult<Json<SystemBackupStatus>> {
    let status = backups::system_status(&state.backups).await?;
    Ok(Json(status))
}
