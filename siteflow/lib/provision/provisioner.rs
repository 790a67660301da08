use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    actions::{ActionEngine, CADDYFILE_TARGET},
    audit::{ActionType, TargetType},
    config::{
        LayoutConfig, COMPOSE_TIMEOUT, DEFAULT_COMMAND_TIMEOUT, PROVISION_UP_TIMEOUT,
    },
    discovery::{append_route, remove_route},
    health::UptimeService,
    remote::Remote,
    tunnel::TunnelService,
    utils::{shell_quote, validate_domain, validate_site_name, SITE_ENV_FILENAME},
    SiteflowError, SiteflowResult,
};

use super::{render_landing_page, render_maintenance_page, TemplateType};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Request to create a site.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionRequest {
    /// Site name (lowercase alphanumeric with single hyphens).
    pub name: String,
    /// Template to materialize.
    pub template: TemplateType,
    /// Public domain; defaults to `<name>.<base_domain>`.
    #[serde(default)]
    pub domain: Option<String>,
    /// Extra entries for the site `.env`.
    #[serde(default)]
    pub environment: std::collections::BTreeMap<String, String>,
}

/// Result of a successful provision.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionResponse {
    /// Site name.
    pub name: String,
    /// Template used.
    pub template: TemplateType,
    /// `success`.
    pub status: String,
    /// Human-readable summary.
    pub message: String,
    /// Site path on the managed host.
    pub path: String,
    /// Routed domain.
    pub domain: String,
}

/// Request to destroy a site.
#[derive(Debug, Clone, Deserialize)]
pub struct DeprovisionRequest {
    /// Site name.
    pub name: String,
    /// Also remove the stack's volumes.
    #[serde(default)]
    pub remove_volumes: bool,
    /// Also delete the site directory.
    #[serde(default)]
    pub remove_files: bool,
}

/// Result of a deprovision.
#[derive(Debug, Clone, Serialize)]
pub struct DeprovisionResponse {
    /// Site name.
    pub name: String,
    /// `success`.
    pub status: String,
    /// Human-readable summary.
    pub message: String,
    /// Whether volumes were removed.
    pub volumes_removed: bool,
    /// Whether files were removed.
    pub files_removed: bool,
}

/// Creates and destroys sites transactionally.
pub struct Provisioner {
    pub(crate) remote: Arc<dyn Remote>,
    engine: Arc<ActionEngine>,
    tunnel: Arc<dyn TunnelService>,
    uptime: Arc<dyn UptimeService>,
    layout: LayoutConfig,
}

/// Undo actions accumulated during a create, replayed in reverse on
/// failure. Compensations are best-effort: their own failures are logged,
/// never propagated.
struct CompensationStack {
    steps: Vec<(String, Pin<Box<dyn Future<Output = ()> + Send>>)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CompensationStack {
    fn new() -> Self {
        Self { steps: Vec::new() }
    }

    fn push<F>(&mut self, label: impl Into<String>, undo: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.steps.push((label.into(), Box::pin(undo)));
    }

    /// Replays every compensation in reverse order; returns their labels.
    async fn unwind(self) -> Vec<String> {
        let mut performed = Vec::new();
        for (label, undo) in self.steps.into_iter().rev() {
            tracing::warn!(compensation = %label, "rolling back provisioning step");
            undo.await;
            performed.push(label);
        }
        performed
    }
}

impl Provisioner {
    /// Creates a provisioner sharing the action engine's audit, locks and
    /// cache.
    pub fn new(
        remote: Arc<dyn Remote>,
        engine: Arc<ActionEngine>,
        tunnel: Arc<dyn TunnelService>,
        uptime: Arc<dyn UptimeService>,
        layout: LayoutConfig,
    ) -> Self {
        Self {
            remote,
            engine,
            tunnel,
            uptime,
            layout,
        }
    }

    /// Provisions a new site.
    ///
    /// Steps follow the order: validate, skeleton, proxy route, external
    /// resources (DNS, tunnel, monitor), compose up, wait for a healthy
    /// container, proxy reload. Any failure unwinds the compensation stack
    /// and surfaces the original error; the audit entry lists the
    /// compensations performed.
    pub async fn provision(&self, request: &ProvisionRequest) -> SiteflowResult<ProvisionResponse> {
        let name = validate_site_name(&request.name)?;
        let domain = match &request.domain {
            Some(domain) => validate_domain(domain)?,
            None => {
                if self.layout.base_domain.is_empty() {
                    return Err(SiteflowError::Validation(
                        "no domain given and no base domain configured".to_string(),
                    ));
                }
                validate_domain(&format!("{name}.{}", self.layout.base_domain))?
            }
        };

        let _lock = self.engine.locks.lock(&name).await;
        let scope = self
            .engine
            .recorder()
            .begin(
                ActionType::SiteProvision,
                TargetType::Site,
                &name,
                json!({"template": request.template.as_str(), "domain": domain}),
            )
            .await;

        let mut compensations = CompensationStack::new();
        let result = self
            .run_provision(&name, request.template, &domain, &request.environment, &mut compensations)
            .await;

        match result {
            Result::Ok(response) => {
                scope
                    .succeed(Some(format!(
                        "site provisioned with template {} at {domain}",
                        request.template.as_str()
                    )))
                    .await;
                self.engine.overview().invalidate();
                Ok(response)
            }
            Result::Err(error) => {
                let performed = compensations.unwind().await;
                tracing::error!(
                    site = %name,
                    error = %error,
                    rolled_back = performed.len(),
                    "provisioning failed, rollback complete"
                );
                scope
                    .fail(&SiteflowError::Fatal {
                        reason: error.to_string(),
                        compensations: performed,
                    })
                    .await;
                Err(error)
            }
        }
    }

    async fn run_provision(
        &self,
        name: &str,
        template: TemplateType,
        domain: &str,
        environment: &std::collections::BTreeMap<String, String>,
        compensations: &mut CompensationStack,
    ) -> SiteflowResult<ProvisionResponse> {
        let site_path = format!("{}/{name}", self.layout.sites_root);
        let quoted_path = shell_quote(&site_path);

        self.ensure_proxy_network().await?;

        let exists = self
            .remote
            .run(
                &format!("test -d {quoted_path} && echo exists || echo missing"),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        if exists.stdout.contains("exists") {
            return Err(SiteflowError::Conflict(format!("site '{name}' already exists")));
        }

        // Site skeleton.
        self.remote
            .run_checked(&format!("mkdir -p {quoted_path}"), DEFAULT_COMMAND_TIMEOUT)
            .await?;
        {
            let remote = self.remote.clone();
            let path = site_path.clone();
            compensations.push("remove site directory", async move {
                let cmd = format!("rm -rf {}", shell_quote(&path));
                if let Result::Err(e) = remote.run(&cmd, DEFAULT_COMMAND_TIMEOUT).await {
                    tracing::error!(error = %e, "failed to remove site directory during rollback");
                }
            });
        }

        self.materialize_template(name, template, domain, environment, &site_path)
            .await?;

        // Proxy route, serialized with the route actions on the shared file.
        let previous_caddyfile = {
            let _caddy = self.engine.locks.lock(CADDYFILE_TARGET).await;
            let previous = match self.remote.read_file(&self.layout.caddyfile_path).await {
                Result::Ok(content) => content,
                Result::Err(SiteflowError::NotFound(_)) => String::new(),
                Result::Err(e) => return Err(e),
            };
            let updated = append_route(&previous, domain, name, template.origin_port())?;
            self.engine.replace_caddyfile(&updated).await?;
            previous
        };
        {
            let engine = self.engine.clone();
            let previous = previous_caddyfile.clone();
            compensations.push("restore proxy config", async move {
                let _caddy = engine.locks.lock(CADDYFILE_TARGET).await;
                if let Result::Err(e) = engine.replace_caddyfile(&previous).await {
                    tracing::error!(error = %e, "failed to restore proxy config during rollback");
                }
            });
        }

        // External resources, each idempotent with a matching undo.
        self.tunnel.add_dns_record(domain).await?;
        {
            let tunnel = self.tunnel.clone();
            let domain = domain.to_string();
            compensations.push("remove DNS record", async move {
                match tunnel.remove_dns_record(&domain).await {
                    Result::Ok(()) => {}
                    Result::Err(e) if e.is_integrity() => {}
                    Result::Err(e) => {
                        tracing::error!(error = %e, "failed to remove DNS record during rollback");
                    }
                }
            });
        }

        let service_url = "http://localhost:80";
        self.tunnel.add_public_hostname(domain, service_url).await?;
        {
            let tunnel = self.tunnel.clone();
            let domain = domain.to_string();
            compensations.push("remove tunnel hostname", async move {
                match tunnel.remove_public_hostname(&domain).await {
                    Result::Ok(()) => {}
                    Result::Err(e) if e.is_integrity() => {}
                    Result::Err(e) => {
                        tracing::error!(error = %e, "failed to remove tunnel hostname during rollback");
                    }
                }
            });
        }

        self.uptime
            .create_monitor(name, &format!("https://{domain}"))
            .await?;
        {
            let uptime = self.uptime.clone();
            let name = name.to_string();
            compensations.push("delete uptime monitor", async move {
                match uptime.delete_monitor(&name).await {
                    Result::Ok(()) | Result::Err(SiteflowError::NotFound(_)) => {}
                    Result::Err(e) => {
                        tracing::error!(error = %e, "failed to delete monitor during rollback");
                    }
                }
            });
        }

        // Bring the stack up.
        self.remote
            .run_checked(
                &format!("cd {quoted_path} && docker compose up -d"),
                COMPOSE_TIMEOUT,
            )
            .await?;
        {
            let remote = self.remote.clone();
            let path = site_path.clone();
            compensations.push("stop compose stack", async move {
                let cmd = format!("cd {} && docker compose down -v", shell_quote(&path));
                if let Result::Err(e) = remote.run(&cmd, COMPOSE_TIMEOUT).await {
                    tracing::error!(error = %e, "failed to stop stack during rollback");
                }
            });
        }

        self.wait_for_container(name).await?;

        self.engine.run_caddy_reload().await?;

        Ok(ProvisionResponse {
            name: name.to_string(),
            template,
            status: "success".to_string(),
            message: format!("site '{name}' provisioned successfully at {domain}"),
            path: site_path,
            domain: domain.to_string(),
        })
    }

    async fn materialize_template(
        &self,
        name: &str,
        template: TemplateType,
        domain: &str,
        environment: &std::collections::BTreeMap<String, String>,
        site_path: &str,
    ) -> SiteflowResult<()> {
        let secret = uuid::Uuid::new_v4().simple().to_string();
        let compose = template.render_compose(name, &secret);
        self.remote
            .upload(&format!("{site_path}/docker-compose.yml"), compose.as_bytes())
            .await?;

        let mut env = format!("DOMAIN={domain}\n");
        for (key, value) in environment {
            env.push_str(&format!("{key}={value}\n"));
        }
        self.remote
            .upload(&format!("{site_path}/{SITE_ENV_FILENAME}"), env.as_bytes())
            .await?;

        for dir in template.skeleton_dirs() {
            self.remote
                .run_checked(
                    &format!("mkdir -p {}", shell_quote(&format!("{site_path}/{dir}"))),
                    DEFAULT_COMMAND_TIMEOUT,
                )
                .await?;
        }

        if let Some(dir) = template.landing_page_dir() {
            self.remote
                .upload(
                    &format!("{site_path}/{dir}/index.html"),
                    render_landing_page(name).as_bytes(),
                )
                .await?;
        }
        self.remote
            .upload(
                &format!(
                    "{site_path}/{}/maintenance.html",
                    template.maintenance_page_dir()
                ),
                render_maintenance_page(name).as_bytes(),
            )
            .await?;

        Ok(())
    }

    /// Polls until at least one of the site's containers reports "Up", or
    /// the bounded window elapses.
    async fn wait_for_container(&self, name: &str) -> SiteflowResult<()> {
        let deadline = tokio::time::Instant::now() + PROVISION_UP_TIMEOUT;
        let cmd = format!(
            "docker ps --filter name={} --format '{{{{.Status}}}}'",
            shell_quote(name)
        );
        loop {
            let output = self.remote.run(&cmd, DEFAULT_COMMAND_TIMEOUT).await?;
            if output.stdout.lines().any(|line| line.trim().starts_with("Up")) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SiteflowError::Fatal {
                    reason: format!("no container for '{name}' reported Up in time"),
                    compensations: Vec::new(),
                });
            }
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
    }

    async fn ensure_proxy_network(&self) -> SiteflowResult<()> {
        let output = self
            .remote
            .run(
                "docker network ls --filter name=web_proxy --format '{{.Name}}'",
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        if !output.stdout.lines().any(|line| line.trim() == "web_proxy") {
            tracing::info!("creating web_proxy network");
            self.remote
                .run_checked("docker network create web_proxy", DEFAULT_COMMAND_TIMEOUT)
                .await?;
        }
        Ok(())
    }

    /// Tears a site down. Missing external resources are warn-logged
    /// successes; the whole operation is idempotent.
    pub async fn deprovision(
        &self,
        request: &DeprovisionRequest,
    ) -> SiteflowResult<DeprovisionResponse> {
        let name = validate_site_name(&request.name)?;
        let _lock = self.engine.locks.lock(&name).await;
        let scope = self
            .engine
            .recorder()
            .begin(
                ActionType::SiteDeprovision,
                TargetType::Site,
                &name,
                json!({
                    "remove_volumes": request.remove_volumes,
                    "remove_files": request.remove_files,
                }),
            )
            .await;

        let result = self.run_deprovision(&name, request).await;
        match &result {
            Result::Ok(_) => {
                scope
                    .succeed(Some(format!(
                        "site deprovisioned (volumes: {}, files: {})",
                        request.remove_volumes, request.remove_files
                    )))
                    .await;
                self.engine.overview().invalidate();
            }
            Result::Err(e) => scope.fail(e).await,
        }
        result
    }

    async fn run_deprovision(
        &self,
        name: &str,
        request: &DeprovisionRequest,
    ) -> SiteflowResult<DeprovisionResponse> {
        let site_path = format!("{}/{name}", self.layout.sites_root);
        let quoted_path = shell_quote(&site_path);

        let exists = self
            .remote
            .run(
                &format!("test -d {quoted_path} && echo exists || echo missing"),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        if exists.stdout.contains("missing") {
            return Err(SiteflowError::NotFound(format!("site '{name}'")));
        }

        // The routed domain, for provider cleanup.
        let domain = match self
            .remote
            .read_file(&format!("{site_path}/{SITE_ENV_FILENAME}"))
            .await
        {
            Result::Ok(env) => env
                .lines()
                .find_map(|line| line.strip_prefix("DOMAIN=").map(str::to_string)),
            Result::Err(_) => None,
        };

        let volume_flag = if request.remove_volumes { " -v" } else { "" };
        if let Result::Err(e) = self
            .remote
            .run(
                &format!("cd {quoted_path} && docker compose down{volume_flag}"),
                COMPOSE_TIMEOUT,
            )
            .await
        {
            tracing::warn!(site = %name, error = %e, "compose down failed during deprovision");
        }

        // Proxy route. A route that is already gone is fine.
        {
            let _caddy = self.engine.locks.lock(CADDYFILE_TARGET).await;
            match self.remote.read_file(&self.layout.caddyfile_path).await {
                Result::Ok(current) => {
                    let removed = domain
                        .as_deref()
                        .and_then(|d| remove_route(&current, d).ok());
                    if let Some(updated) = removed {
                        self.engine.replace_caddyfile(&updated).await?;
                        if let Result::Err(e) = self.engine.run_caddy_reload().await {
                            tracing::warn!(error = %e, "proxy reload failed during deprovision");
                        }
                    } else {
                        tracing::warn!(site = %name, "no proxy route found during deprovision");
                    }
                }
                Result::Err(e) => {
                    tracing::warn!(error = %e, "could not read proxy config during deprovision");
                }
            }
        }

        // Uptime monitor. On this path a missing monitor is external state
        // that already matches the desired outcome.
        let monitor_result = match self.uptime.delete_monitor(name).await {
            Result::Err(SiteflowError::NotFound(what)) => {
                Err(SiteflowError::Integrity(format!("{what} already absent")))
            }
            other => other,
        };
        tolerate_divergence(monitor_result, "uptime monitor", name);

        // DNS and tunnel hostname.
        if let Some(domain) = &domain {
            tolerate_divergence(
                self.tunnel.remove_public_hostname(domain).await,
                "tunnel hostname",
                domain,
            );
            tolerate_divergence(
                self.tunnel.remove_dns_record(domain).await,
                "DNS record",
                domain,
            );
        }

        let mut files_removed = false;
        if request.remove_files {
            self.remote
                .run_checked(&format!("rm -rf {quoted_path}"), DEFAULT_COMMAND_TIMEOUT)
                .await?;
            files_removed = true;
        }

        Ok(DeprovisionResponse {
            name: name.to_string(),
            status: "success".to_string(),
            message: format!("site '{name}' deprovisioned successfully"),
            volumes_removed: request.remove_volumes,
            files_removed,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Applies the idempotent-teardown policy to an external removal result:
/// an integrity divergence (the resource was already gone) is logged at
/// warn and treated as success; any other failure is logged and likewise
/// does not abort the teardown.
fn tolerate_divergence(result: SiteflowResult<()>, resource: &str, target: &str) {
    match result {
        Result::Ok(()) => {}
        Result::Err(e) if e.is_integrity() => {
            tracing::warn!(resource, target, error = %e, "external state diverged, treating as success");
        }
        Result::Err(e) => {
            tracing::warn!(resource, target, error = %e, "failed to remove external resource");
        }
    }
}
