//! Route definitions for the HTTP server.

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use super::{handlers, state::ServerState, ws};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates the router with every API endpoint configured.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz_handler))
        .route("/api/sites/", get(handlers::list_sites_handler))
        .route(
            "/api/sites/caddy/reload",
            post(handlers::caddy_reload_handler),
        )
        .route(
            "/api/sites/containers/:name/:action",
            post(handlers::container_action_handler),
        )
        .route("/api/sites/:site/domain", put(handlers::set_site_domain_handler))
        .route("/api/sites/:site/:action", post(handlers::site_action_handler))
        .route("/api/graph/", get(handlers::graph_handler))
        .route(
            "/api/routes/",
            get(handlers::list_routes_handler)
                .post(handlers::add_route_handler)
                .delete(handlers::remove_route_handler),
        )
        .route(
            "/api/provision/templates",
            get(handlers::provision_templates_handler),
        )
        .route(
            "/api/provision/detect",
            post(handlers::provision_detect_handler),
        )
        .route(
            "/api/provision/",
            post(handlers::provision_create_handler).delete(handlers::provision_delete_handler),
        )
        .route("/api/deploy/github", post(handlers::deploy_github_handler))
        .route("/api/deploy/upload", post(handlers::deploy_upload_handler))
        .route("/api/deploy/folder", post(handlers::deploy_folder_handler))
        .route("/api/deploy/pull", post(handlers::deploy_pull_handler))
        .route(
            "/api/deploy/:site/status",
            get(handlers::deploy_status_handler),
        )
        .route("/api/health/", get(handlers::health_handler))
        .route(
            "/api/health/monitors",
            post(handlers::create_monitor_handler),
        )
        .route(
            "/api/health/monitors/:site",
            delete(handlers::delete_monitor_handler),
        )
        .route("/api/audit/logs", get(handlers::audit_logs_handler))
        .route("/api/audit/cleanup", post(handlers::audit_cleanup_handler))
        .route(
            "/api/backups/runs",
            post(handlers::backups_ingest_handler).get(handlers::backups_runs_handler),
        )
        .route(
            "/api/backups/summary",
            get(handlers::backups_summary_handler),
        )
        .route(
            "/api/backups/snapshots",
            get(handlers::backups_snapshots_handler),
        )
        .route(
            "/api/backups/system/status",
            get(handlers::backups_system_status_handler),
        )
        .route("/api/ws", get(ws::ws_handler))
        .with_state(state)
}
