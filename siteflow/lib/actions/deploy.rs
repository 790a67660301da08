use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    audit::{ActionType, TargetType},
    config::{COMPOSE_TIMEOUT, DEFAULT_COMMAND_TIMEOUT, GIT_TIMEOUT, MAX_UPLOAD_SIZE},
    utils::{
        remote_join, shell_quote, validate_branch, validate_git_url, validate_site_name,
        DEPLOY_CONFIG_FILENAME,
    },
    SiteflowError, SiteflowResult,
};

use super::{engine::join_output, ActionEngine};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The per-site deploy marker written after a git deploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Normalized clone URL.
    pub repo_url: String,
    /// Tracked branch.
    pub branch: String,
}

/// Deployment status for a site.
#[derive(Debug, Clone, Serialize)]
pub struct DeployStatus {
    /// Site name.
    pub site: String,
    /// Whether a git deployment is configured.
    pub configured: bool,
    /// Clone URL, when configured.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub repo_url: Option<String>,
    /// Tracked branch, when configured.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub branch: Option<String>,
    /// Last commit summary, when available.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_commit: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ActionEngine {
    /// Deploys a site from a git repository: clone or fetch + hard reset,
    /// record the deploy marker, rebuild the stack.
    pub async fn deploy_git(
        &self,
        site: &str,
        repo_url: &str,
        branch: &str,
    ) -> SiteflowResult<String> {
        let site = validate_site_name(site)?;
        let repo_url = validate_git_url(repo_url)?;
        let branch = validate_branch(branch)?;

        let _lock = self.locks.lock(&site).await;
        let scope = self
            .recorder
            .begin(
                ActionType::DeployGit,
                TargetType::Site,
                &site,
                json!({"repo_url": repo_url, "branch": branch}),
            )
            .await;

        let result = self.run_deploy_git(&site, &repo_url, &branch).await;
        scope.finish(&result, result.as_ref().ok().cloned()).await;
        result
    }

    async fn run_deploy_git(
        &self,
        site: &str,
        repo_url: &str,
        branch: &str,
    ) -> SiteflowResult<String> {
        let site_path = self.site_path(site);
        self.ensure_site_exists(&site_path, site).await?;
        let deploy_dir = self.deploy_dir(&site_path).await;
        let quoted_dir = shell_quote(&deploy_dir);

        let is_git = self
            .remote
            .run(
                &format!("test -d {quoted_dir}/.git && echo git || echo empty"),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?
            .stdout
            .contains("git");

        let mut outputs = Vec::new();

        let git_cmd = if is_git {
            format!(
                "cd {quoted_dir} && git fetch origin && git reset --hard origin/{}",
                shell_quote(branch)
            )
        } else {
            format!(
                "rm -rf {quoted_dir} && git clone --branch {} --depth 1 {} {quoted_dir}",
                shell_quote(branch),
                shell_quote(repo_url)
            )
        };
        let output = self.remote.run_checked(&git_cmd, GIT_TIMEOUT).await?;
        outputs.push(join_output(&output.stdout, &output.stderr));

        let config = DeployConfig {
            repo_url: repo_url.to_string(),
            branch: branch.to_string(),
        };
        self.write_deploy_config(&site_path, &config).await?;

        outputs.push(self.rebuild_stack(&site_path).await?);
        outputs.push(self.resolved_commit(&deploy_dir).await);

        self.overview.invalidate();
        Ok(outputs.join("\n").trim().to_string())
    }

    /// Fast-forwards the configured deployment and rebuilds.
    pub async fn deploy_pull(&self, site: &str) -> SiteflowResult<String> {
        let site = validate_site_name(site)?;
        let _lock = self.locks.lock(&site).await;
        let scope = self
            .recorder
            .begin(
                ActionType::DeployPull,
                TargetType::Site,
                &site,
                serde_json::Value::Null,
            )
            .await;

        let result = self.run_deploy_pull(&site).await;
        scope.finish(&result, result.as_ref().ok().cloned()).await;
        result
    }

    async fn run_deploy_pull(&self, site: &str) -> SiteflowResult<String> {
        let site_path = self.site_path(site);
        self.ensure_site_exists(&site_path, site).await?;

        let config = self.read_deploy_config(&site_path).await?.ok_or_else(|| {
            SiteflowError::Validation(
                "no deployment configured; deploy from a repository first".to_string(),
            )
        })?;
        let branch = validate_branch(&config.branch)?;

        let deploy_dir = self.deploy_dir(&site_path).await;
        let quoted_dir = shell_quote(&deploy_dir);

        let output = self
            .remote
            .run_checked(
                &format!(
                    "cd {quoted_dir} && git fetch origin && git reset --hard origin/{}",
                    shell_quote(&branch)
                ),
                GIT_TIMEOUT,
            )
            .await?;

        let mut outputs = vec![join_output(&output.stdout, &output.stderr)];
        outputs.push(self.rebuild_stack(&site_path).await?);
        outputs.push(self.resolved_commit(&deploy_dir).await);

        self.overview.invalidate();
        Ok(outputs.join("\n").trim().to_string())
    }

    /// Deployment status for a site.
    pub async fn deploy_status(&self, site: &str) -> SiteflowResult<DeployStatus> {
        let site = validate_site_name(site)?;
        let site_path = self.site_path(&site);
        self.ensure_site_exists(&site_path, &site).await?;

        let Some(config) = self.read_deploy_config(&site_path).await? else {
            return Ok(DeployStatus {
                site,
                configured: false,
                repo_url: None,
                branch: None,
                last_commit: None,
            });
        };

        let deploy_dir = self.deploy_dir(&site_path).await;
        let commit = self.resolved_commit(&deploy_dir).await;
        Ok(DeployStatus {
            site,
            configured: true,
            repo_url: Some(config.repo_url),
            branch: Some(config.branch),
            last_commit: (!commit.is_empty()).then_some(commit),
        })
    }

    /// Deploys a site from an uploaded zip archive: stage, extract,
    /// atomically swap into the deploy directory, rebuild.
    pub async fn deploy_upload(
        &self,
        site: &str,
        filename: &str,
        bytes: &[u8],
    ) -> SiteflowResult<String> {
        let site = validate_site_name(site)?;
        if !filename.ends_with(".zip") {
            return Err(SiteflowError::Validation(
                "only .zip files are supported".to_string(),
            ));
        }
        if bytes.len() > MAX_UPLOAD_SIZE {
            return Err(SiteflowError::Validation(format!(
                "upload too large ({} bytes, max {MAX_UPLOAD_SIZE})",
                bytes.len()
            )));
        }

        let _lock = self.locks.lock(&site).await;
        let scope = self
            .recorder
            .begin(
                ActionType::DeployUpload,
                TargetType::Site,
                &site,
                json!({"filename": filename, "bytes": bytes.len()}),
            )
            .await;

        let result = self.run_deploy_upload(&site, bytes).await;
        scope.finish(&result, result.as_ref().ok().cloned()).await;
        result
    }

    async fn run_deploy_upload(&self, site: &str, bytes: &[u8]) -> SiteflowResult<String> {
        let site_path = self.site_path(site);
        self.ensure_site_exists(&site_path, site).await?;
        let deploy_dir = self.deploy_dir(&site_path).await;
        let staging = format!("{deploy_dir}.staging");
        let quoted_staging = shell_quote(&staging);
        let remote_zip = format!("/tmp/siteflow-deploy-{site}.zip");

        self.remote.upload(&remote_zip, bytes).await?;

        let extract = format!(
            "rm -rf {quoted_staging} && mkdir -p {quoted_staging} && \
             unzip -o {} -d {quoted_staging} && rm -f {}",
            shell_quote(&remote_zip),
            shell_quote(&remote_zip)
        );
        let output = self.remote.run_checked(&extract, COMPOSE_TIMEOUT).await?;

        // A zip with a single root folder deploys that folder's contents.
        self.remote
            .run(
                &format!(
                    "cd {quoted_staging} && if [ $(ls -1 | wc -l) -eq 1 ] && [ -d \"$(ls -1)\" ]; \
                     then mv \"$(ls -1)\"/* . 2>/dev/null; rmdir */ 2>/dev/null; fi; true"
                ),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;

        self.swap_staging(&deploy_dir, &staging).await?;

        let mut outputs = vec![join_output(&output.stdout, &output.stderr)];
        outputs.push(self.rebuild_stack(&site_path).await?);

        self.overview.invalidate();
        Ok(outputs.join("\n").trim().to_string())
    }

    /// Deploys a site from individual files with relative paths.
    pub async fn deploy_folder(
        &self,
        site: &str,
        files: &[(String, Vec<u8>)],
    ) -> SiteflowResult<String> {
        let site = validate_site_name(site)?;
        if files.is_empty() {
            return Err(SiteflowError::Validation("no files provided".to_string()));
        }

        let _lock = self.locks.lock(&site).await;
        let scope = self
            .recorder
            .begin(
                ActionType::DeployFolder,
                TargetType::Site,
                &site,
                json!({"file_count": files.len()}),
            )
            .await;

        let result = self.run_deploy_folder(&site, files).await;
        scope.finish(&result, result.as_ref().ok().cloned()).await;
        result
    }

    async fn run_deploy_folder(
        &self,
        site: &str,
        files: &[(String, Vec<u8>)],
    ) -> SiteflowResult<String> {
        let site_path = self.site_path(site);
        self.ensure_site_exists(&site_path, site).await?;
        let deploy_dir = self.deploy_dir(&site_path).await;
        let staging = format!("{deploy_dir}.staging");

        self.remote
            .run_checked(
                &format!(
                    "rm -rf {} && mkdir -p {}",
                    shell_quote(&staging),
                    shell_quote(&staging)
                ),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;

        let mut uploaded = 0usize;
        for (name, bytes) in files {
            if bytes.len() > MAX_UPLOAD_SIZE {
                tracing::warn!(file = %name, "skipping oversized file");
                continue;
            }
            // Browsers prefix the picked folder name; drop that first
            // segment and reject traversal in the remainder.
            let normalized = name.replace('\\', "/");
            let parts: Vec<&str> = normalized.split('/').filter(|p| !p.is_empty()).collect();
            let relative: Vec<&str> = if parts.len() > 1 { parts[1..].to_vec() } else { parts };
            if relative.is_empty() {
                continue;
            }
            let remote_path = remote_join(&staging, &relative)?;
            self.remote.upload(&remote_path, bytes).await?;
            uploaded += 1;
        }

        self.swap_staging(&deploy_dir, &staging).await?;

        let mut outputs = vec![format!("uploaded {uploaded} files")];
        outputs.push(self.rebuild_stack(&site_path).await?);

        self.overview.invalidate();
        Ok(outputs.join("\n").trim().to_string())
    }

    /// Determines the deploy directory: static site templates mount
    /// `./public`, everything else mounts `./app`.
    async fn deploy_dir(&self, site_path: &str) -> String {
        let compose_path = format!("{site_path}/docker-compose.yml");
        match self.remote.read_file(&compose_path).await {
            Result::Ok(compose)
                if compose.contains("./public:") || compose.contains("./public/") =>
            {
                format!("{site_path}/public")
            }
            _ => format!("{site_path}/app"),
        }
    }

    async fn swap_staging(&self, deploy_dir: &str, staging: &str) -> SiteflowResult<()> {
        self.remote
            .run_checked(
                &format!(
                    "rm -rf {} && mv {} {}",
                    shell_quote(deploy_dir),
                    shell_quote(staging),
                    shell_quote(deploy_dir)
                ),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn rebuild_stack(&self, site_path: &str) -> SiteflowResult<String> {
        let quoted = shell_quote(site_path);
        let output = self
            .remote
            .run_checked(
                &format!(
                    "cd {quoted} && docker compose down && \
                     docker compose build --no-cache && docker compose up -d"
                ),
                COMPOSE_TIMEOUT,
            )
            .await?;
        Ok(join_output(&output.stdout, &output.stderr))
    }

    async fn resolved_commit(&self, deploy_dir: &str) -> String {
        let output = self
            .remote
            .run(
                &format!(
                    "cd {} && git log -1 --format='%h %s (%ar)' 2>/dev/null || true",
                    shell_quote(deploy_dir)
                ),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await;
        match output {
            Result::Ok(output) if output.exit_code == 0 => output.stdout,
            _ => String::new(),
        }
    }

    async fn write_deploy_config(
        &self,
        site_path: &str,
        config: &DeployConfig,
    ) -> SiteflowResult<()> {
        let path = format!("{site_path}/{DEPLOY_CONFIG_FILENAME}");
        let bytes = serde_json::to_vec_pretty(config)?;
        self.remote.upload(&path, &bytes).await
    }

    async fn read_deploy_config(&self, site_path: &str) -> SiteflowResult<Option<DeployConfig>> {
        let path = format!("{site_path}/{DEPLOY_CONFIG_FILENAME}");
        match self.remote.read_file(&path).await {
            Result::Ok(raw) => Ok(serde_json::from_str(&raw).ok()),
            Result::Err(SiteflowError::NotFound(_)) => Ok(None),
            Result::Err(e) => Err(e),
        }
    }
}
