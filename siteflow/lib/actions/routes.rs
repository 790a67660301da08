use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    audit::{ActionType, TargetType},
    config::DEFAULT_COMMAND_TIMEOUT,
    discovery::{append_route, parse_caddyfile, remove_route},
    utils::{shell_quote, validate_container_name, validate_domain},
    SiteflowError, SiteflowResult,
};

use super::{ActionEngine, CADDYFILE_TARGET};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One reverse-proxy route as exposed by the routes API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    /// Routed domain.
    pub domain: String,
    /// Raw proxy target.
    pub target: String,
    /// Container part of the target, when it names one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub container: Option<String>,
    /// Port part of the target.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub port: Option<u16>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ActionEngine {
    /// Lists all routes parsed from the proxy config. A missing config
    /// yields an empty list.
    pub async fn list_routes(&self) -> SiteflowResult<Vec<RouteInfo>> {
        let content = match self.remote.read_file(&self.layout.caddyfile_path).await {
            Result::Ok(content) => content,
            Result::Err(SiteflowError::NotFound(_)) => return Ok(Vec::new()),
            Result::Err(e) => return Err(e),
        };

        let mut routes = Vec::new();
        for block in parse_caddyfile(&content) {
            for host in &block.hosts {
                for target in &block.reverse_proxies {
                    let bare = target.split('/').next().unwrap_or(target);
                    let (container, port) = match bare.split_once(':') {
                        Some((container, port)) => {
                            (Some(container.to_string()), port.parse().ok())
                        }
                        None => (Some(bare.to_string()), None),
                    };
                    routes.push(RouteInfo {
                        domain: host.clone(),
                        target: target.clone(),
                        container: container.filter(|c| !c.is_empty()),
                        port,
                    });
                }
            }
        }
        Ok(routes)
    }

    /// Adds a route (domain → container:port), reloads the proxy, and rolls
    /// the config back when the reload fails.
    pub async fn add_route(
        &self,
        domain: &str,
        container: &str,
        port: u16,
    ) -> SiteflowResult<String> {
        let domain = validate_domain(domain)?;
        let container = validate_container_name(container)?;

        let _lock = self.locks.lock(CADDYFILE_TARGET).await;
        let scope = self
            .recorder
            .begin(
                ActionType::RouteAdd,
                TargetType::Route,
                &domain,
                json!({"container": container, "port": port}),
            )
            .await;

        let result = self.run_add_route(&domain, &container, port).await;
        scope
            .finish(&result, result.as_ref().ok().cloned())
            .await;
        result
    }

    async fn run_add_route(
        &self,
        domain: &str,
        container: &str,
        port: u16,
    ) -> SiteflowResult<String> {
        let current = match self.remote.read_file(&self.layout.caddyfile_path).await {
            Result::Ok(content) => content,
            Result::Err(SiteflowError::NotFound(_)) => String::new(),
            Result::Err(e) => return Err(e),
        };

        let updated = append_route(&current, domain, container, port)?;
        self.replace_caddyfile(&updated).await?;

        if let Result::Err(reload_err) = self.run_caddy_reload().await {
            tracing::warn!(domain, error = %reload_err, "reload failed, restoring previous proxy config");
            self.replace_caddyfile(&current).await?;
            let _ = self.run_caddy_reload().await;
            return Err(reload_err);
        }

        self.overview.invalidate();
        Ok(format!("added route: {domain} -> {container}:{port}"))
    }

    /// Removes a route by domain, with the same reload + rollback contract
    /// as [`add_route`](Self::add_route).
    pub async fn remove_route(&self, domain: &str) -> SiteflowResult<String> {
        let domain = validate_domain(domain)?;

        let _lock = self.locks.lock(CADDYFILE_TARGET).await;
        let scope = self
            .recorder
            .begin(
                ActionType::RouteRemove,
                TargetType::Route,
                &domain,
                serde_json::Value::Null,
            )
            .await;

        let result = self.run_remove_route(&domain).await;
        scope
            .finish(&result, result.as_ref().ok().cloned())
            .await;
        result
    }

    async fn run_remove_route(&self, domain: &str) -> SiteflowResult<String> {
        let current = self.remote.read_file(&self.layout.caddyfile_path).await?;
        let updated = remove_route(&current, domain)?;
        self.replace_caddyfile(&updated).await?;

        if let Result::Err(reload_err) = self.run_caddy_reload().await {
            tracing::warn!(domain, error = %reload_err, "reload failed, restoring previous proxy config");
            self.replace_caddyfile(&current).await?;
            let _ = self.run_caddy_reload().await;
            return Err(reload_err);
        }

        self.overview.invalidate();
        Ok(format!("removed route: {domain}"))
    }

    /// Writes the proxy config atomically: upload to a temp path in the
    /// same directory, then rename over the original.
    pub(crate) async fn replace_caddyfile(&self, content: &str) -> SiteflowResult<()> {
        let path = &self.layout.caddyfile_path;
        let tmp_path = format!("{path}.siteflow-tmp");
        self.remote.upload(&tmp_path, content.as_bytes()).await?;
        self.remote
            .run_checked(
                &format!("mv {} {}", shell_quote(&tmp_path), shell_quote(path)),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        Ok(())
    }
}
