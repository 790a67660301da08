use std::sync::Arc;

use serde_json::json;

use crate::{
    audit::{ActionType, AuditRecorder, TargetType},
    config::{LayoutConfig, COMPOSE_TIMEOUT, DEFAULT_COMMAND_TIMEOUT, LOGS_TAIL_LINES},
    remote::{Remote, TargetLocks},
    state::Overview,
    utils::{shell_quote, validate_container_name, validate_site_name, SITE_ENV_FILENAME},
    SiteflowError, SiteflowResult,
};

use super::CADDYFILE_TARGET;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Actions runnable against a single container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    /// `docker start`.
    Start,
    /// `docker stop`.
    Stop,
    /// `docker restart`.
    Restart,
    /// Tail capture of the container log.
    Logs,
}

/// Actions runnable against a site's compose stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteAction {
    /// `docker compose up -d`.
    Start,
    /// `docker compose down`.
    Stop,
    /// `docker compose down && docker compose up -d`.
    Restart,
}

/// Executes lifecycle actions against the managed host.
pub struct ActionEngine {
    pub(crate) remote: Arc<dyn Remote>,
    pub(crate) recorder: AuditRecorder,
    pub(crate) overview: Arc<Overview>,
    pub(crate) locks: TargetLocks,
    pub(crate) layout: LayoutConfig,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainerAction {
    /// Parses an action path segment.
    pub fn parse(value: &str) -> SiteflowResult<Self> {
        match value {
            "start" => Ok(ContainerAction::Start),
            "stop" => Ok(ContainerAction::Stop),
            "restart" => Ok(ContainerAction::Restart),
            "logs" => Ok(ContainerAction::Logs),
            other => Err(SiteflowError::Validation(format!(
                "invalid container action: {other}"
            ))),
        }
    }

    /// The path/wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
            ContainerAction::Logs => "logs",
        }
    }

    fn action_type(&self) -> ActionType {
        match self {
            ContainerAction::Start => ActionType::ContainerStart,
            ContainerAction::Stop => ActionType::ContainerStop,
            ContainerAction::Restart => ActionType::ContainerRestart,
            ContainerAction::Logs => ActionType::ContainerLogs,
        }
    }
}

impl SiteAction {
    /// Parses an action path segment.
    pub fn parse(value: &str) -> SiteflowResult<Self> {
        match value {
            "start" => Ok(SiteAction::Start),
            "stop" => Ok(SiteAction::Stop),
            "restart" => Ok(SiteAction::Restart),
            other => Err(SiteflowError::Validation(format!(
                "invalid site action: {other}"
            ))),
        }
    }

    /// The path/wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteAction::Start => "start",
            SiteAction::Stop => "stop",
            SiteAction::Restart => "restart",
        }
    }

    fn action_type(&self) -> ActionType {
        match self {
            SiteAction::Start => ActionType::SiteStart,
            SiteAction::Stop => ActionType::SiteStop,
            SiteAction::Restart => ActionType::SiteRestart,
        }
    }
}

impl ActionEngine {
    /// Creates an engine.
    pub fn new(
        remote: Arc<dyn Remote>,
        recorder: AuditRecorder,
        overview: Arc<Overview>,
        locks: TargetLocks,
        layout: LayoutConfig,
    ) -> Self {
        Self {
            remote,
            recorder,
            overview,
            locks,
            layout,
        }
    }

    /// Runs a container action and returns the captured output.
    pub async fn container_action(
        &self,
        container: &str,
        action: ContainerAction,
    ) -> SiteflowResult<String> {
        let container = validate_container_name(container)?;
        let _lock = self.locks.lock(&container).await;
        let scope = self
            .recorder
            .begin(
                action.action_type(),
                TargetType::Container,
                &container,
                serde_json::Value::Null,
            )
            .await;

        let result = self.run_container_action(&container, action).await;
        scope
            .finish(&result, result.as_ref().ok().map(|o| o.clone()))
            .await;
        result
    }

    async fn run_container_action(
        &self,
        container: &str,
        action: ContainerAction,
    ) -> SiteflowResult<String> {
        let quoted = shell_quote(container);
        match action {
            ContainerAction::Logs => {
                let output = self
                    .remote
                    .run(
                        &format!("docker logs --tail {LOGS_TAIL_LINES} {quoted}"),
                        DEFAULT_COMMAND_TIMEOUT,
                    )
                    .await?;
                if output.exit_code != 0 && output.stderr.contains("No such container") {
                    return Err(SiteflowError::NotFound(format!("container {container}")));
                }
                Ok(join_output(&output.stdout, &output.stderr))
            }
            _ => {
                let output = self
                    .remote
                    .run(
                        &format!("docker {} {quoted}", action.as_str()),
                        DEFAULT_COMMAND_TIMEOUT,
                    )
                    .await?;
                if output.exit_code != 0 {
                    if output.stderr.contains("No such container") {
                        return Err(SiteflowError::NotFound(format!("container {container}")));
                    }
                    return Err(SiteflowError::CommandFailure {
                        command: format!("docker {} {container}", action.as_str()),
                        exit_code: output.exit_code,
                        stderr: output.stderr,
                    });
                }
                self.overview.invalidate();
                Ok(join_output(&output.stdout, &output.stderr))
            }
        }
    }

    /// Runs a compose action against a site, serialized per site.
    pub async fn site_action(&self, site: &str, action: SiteAction) -> SiteflowResult<String> {
        let site = validate_site_name(site)?;
        let _lock = self.locks.lock(&site).await;
        let scope = self
            .recorder
            .begin(
                action.action_type(),
                TargetType::Site,
                &site,
                serde_json::Value::Null,
            )
            .await;

        let result = self.run_site_action(&site, action).await;
        scope
            .finish(&result, result.as_ref().ok().map(|o| o.clone()))
            .await;
        result
    }

    async fn run_site_action(&self, site: &str, action: SiteAction) -> SiteflowResult<String> {
        let site_path = self.site_path(site);
        self.ensure_site_exists(&site_path, site).await?;

        let quoted = shell_quote(&site_path);
        let cmd = match action {
            SiteAction::Start => format!("cd {quoted} && docker compose up -d"),
            SiteAction::Stop => format!("cd {quoted} && docker compose down"),
            SiteAction::Restart => {
                format!("cd {quoted} && docker compose down && docker compose up -d")
            }
        };

        let output = self.remote.run_checked(&cmd, COMPOSE_TIMEOUT).await?;
        self.overview.invalidate();

        let combined = join_output(&output.stdout, &output.stderr);
        if combined.is_empty() {
            Ok(format!("site {} completed", action.as_str()))
        } else {
            Ok(combined)
        }
    }

    /// Validates the proxy config, then reloads it. Validation failures are
    /// surfaced distinctly from reload failures.
    pub async fn reload_caddy(&self) -> SiteflowResult<String> {
        let _lock = self.locks.lock(CADDYFILE_TARGET).await;
        let scope = self
            .recorder
            .begin(
                ActionType::CaddyReload,
                TargetType::Caddy,
                "caddy",
                serde_json::Value::Null,
            )
            .await;

        let result = self.run_caddy_reload().await;
        scope
            .finish(&result, result.as_ref().ok().map(|o| o.clone()))
            .await;
        result
    }

    pub(crate) async fn run_caddy_reload(&self) -> SiteflowResult<String> {
        let validate = self
            .remote
            .run(
                "docker exec caddy caddy validate --config /etc/caddy/Caddyfile",
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        if validate.exit_code != 0 {
            return Err(SiteflowError::Validation(format!(
                "caddy config invalid: {}",
                first_line(&validate.stderr)
            )));
        }

        let reload = self
            .remote
            .run(
                "docker exec caddy caddy reload --config /etc/caddy/Caddyfile",
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        if reload.exit_code != 0 {
            return Err(SiteflowError::CommandFailure {
                command: "docker exec caddy caddy reload".to_string(),
                exit_code: reload.exit_code,
                stderr: reload.stderr,
            });
        }

        self.overview.invalidate();
        let output = join_output(&reload.stdout, &reload.stderr);
        Ok(if output.is_empty() {
            "caddy reload triggered".to_string()
        } else {
            output
        })
    }

    /// Sets the `DOMAIN` entry of a site's `.env` file.
    pub async fn set_site_domain(&self, site: &str, domain: &str) -> SiteflowResult<String> {
        let site = validate_site_name(site)?;
        let domain = crate::utils::validate_domain(domain)?;
        let _lock = self.locks.lock(&site).await;
        let scope = self
            .recorder
            .begin(
                ActionType::SiteConfig,
                TargetType::Site,
                &site,
                json!({"domain": domain}),
            )
            .await;

        let result = self.run_set_site_domain(&site, &domain).await;
        scope
            .finish(&result, result.as_ref().ok().map(|o| o.clone()))
            .await;
        result
    }

    async fn run_set_site_domain(&self, site: &str, domain: &str) -> SiteflowResult<String> {
        let site_path = self.site_path(site);
        self.ensure_site_exists(&site_path, site).await?;

        let env_path = format!("{site_path}/{SITE_ENV_FILENAME}");
        let existing = match self.remote.read_file(&env_path).await {
            Result::Ok(content) => content,
            Result::Err(SiteflowError::NotFound(_)) => String::new(),
            Result::Err(e) => return Err(e),
        };

        let mut lines: Vec<String> = existing
            .lines()
            .filter(|line| !line.starts_with("DOMAIN="))
            .map(str::to_string)
            .collect();
        lines.push(format!("DOMAIN={domain}"));
        let mut content = lines.join("\n");
        content.push('\n');

        self.remote.upload(&env_path, content.as_bytes()).await?;
        self.overview.invalidate();
        Ok(format!("set DOMAIN={domain}"))
    }

    pub(crate) fn site_path(&self, site: &str) -> String {
        format!("{}/{site}", self.layout.sites_root)
    }

    pub(crate) async fn ensure_site_exists(
        &self,
        site_path: &str,
        site: &str,
    ) -> SiteflowResult<()> {
        let output = self
            .remote
            .run(
                &format!(
                    "test -d {} && echo exists || echo missing",
                    shell_quote(site_path)
                ),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        if output.stdout.contains("missing") {
            return Err(SiteflowError::NotFound(format!("site '{site}'")));
        }
        Ok(())
    }

    /// The audit recorder, shared with the provisioner and WS handlers.
    pub fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    /// The aggregated state views.
    pub fn overview(&self) -> &Arc<Overview> {
        &self.overview
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(crate) fn join_output(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (false, false) => format!("{stdout}\n{stderr}"),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (true, true) => String::new(),
    }
}

fn first_line(value: &str) -> &str {
    value.lines().next().unwrap_or(value)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
