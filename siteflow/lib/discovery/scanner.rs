use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::{
    config::{LayoutConfig, DEFAULT_COMMAND_TIMEOUT},
    models::{derive_site_status, ContainerMetrics, ContainerStatus, Site, SiteService, SiteStatus},
    remote::Remote,
    utils::{COMPOSE_FILENAME, SITE_ENV_FILENAME},
    SiteflowError, SiteflowResult,
};

use super::{
    build_services, parse_caddyfile, parse_compose, parse_env_file, parse_ps_output,
    parse_stats_output,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The discovery pipeline: enumerates site directories, parses compose
/// files, correlates live containers and joins reverse-proxy routes into
/// [`Site`] records.
pub struct SiteScanner {
    remote: Arc<dyn Remote>,
    layout: LayoutConfig,
}

/// Proxy information associated with one container name.
#[derive(Debug, Default, Clone)]
struct ProxyInfo {
    domains: BTreeSet<String>,
    targets: BTreeSet<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SiteScanner {
    /// Creates a scanner over the given remote and layout.
    pub fn new(remote: Arc<dyn Remote>, layout: LayoutConfig) -> Self {
        Self { remote, layout }
    }

    /// Runs the full pipeline once.
    ///
    /// One `docker ps` query serves every site; per-site compose/env reads
    /// are isolated so a single broken site cannot take down the snapshot.
    pub async fn collect_sites(&self) -> SiteflowResult<Vec<Site>> {
        let directories = self
            .remote
            .list_directories(&self.layout.sites_root)
            .await?;
        let containers = self.fetch_containers().await?;
        let proxy_map = self.map_proxy_targets().await?;

        let mut sites = Vec::with_capacity(directories.len());
        for directory in directories {
            if self
                .layout
                .discovery_denylist
                .iter()
                .any(|denied| denied == &directory)
            {
                continue;
            }
            let site = match self.assemble_site(&directory, &containers, &proxy_map).await {
                Result::Ok(site) => site,
                Result::Err(e) => {
                    tracing::warn!(site = %directory, error = %e, "site discovery failed");
                    self.unknown_site(&directory, &e)
                }
            };
            sites.push(site);
        }
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sites)
    }

    /// Samples container metrics from the engine.
    pub async fn collect_metrics(&self) -> SiteflowResult<BTreeMap<String, ContainerMetrics>> {
        let output = self
            .remote
            .run_checked(
                "docker stats --no-stream --format '{{json .}}'",
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        Ok(parse_stats_output(&output.stdout))
    }

    async fn fetch_containers(&self) -> SiteflowResult<BTreeMap<String, ContainerStatus>> {
        let output = self
            .remote
            .run_checked("docker ps -a --format '{{json .}}'", DEFAULT_COMMAND_TIMEOUT)
            .await?;
        Ok(parse_ps_output(&output.stdout))
    }

    /// Builds the container → (domains, targets) map from proxy labels on
    /// running containers and from the standalone Caddyfile.
    async fn map_proxy_targets(&self) -> SiteflowResult<BTreeMap<String, ProxyInfo>> {
        let mut mapping: BTreeMap<String, ProxyInfo> = BTreeMap::new();

        let output = self
            .remote
            .run_checked(
                r#"docker ps -a --format '{{.Names}}|{{.Label "caddy"}}|{{.Label "caddy.reverse_proxy"}}'"#,
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;

        for line in output.stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(3, '|');
            let (Some(name), Some(caddy_label)) = (parts.next(), parts.next()) else {
                continue;
            };
            let reverse_proxy = parts.next().unwrap_or("");
            if caddy_label.is_empty() {
                continue;
            }
            let domain = strip_scheme(caddy_label);
            let info = mapping.entry(name.to_string()).or_default();
            if !domain.is_empty() && !domain.starts_with('$') {
                info.domains.insert(domain);
            }
            if !reverse_proxy.is_empty() {
                info.targets.insert(reverse_proxy.to_string());
            }
        }

        self.augment_from_caddyfile(&mut mapping).await;
        Ok(mapping)
    }

    /// Adds domain mappings for containers routed through the Caddyfile
    /// rather than labels. A missing Caddyfile is not an error.
    async fn augment_from_caddyfile(&self, mapping: &mut BTreeMap<String, ProxyInfo>) {
        let content = match self.remote.read_file(&self.layout.caddyfile_path).await {
            Result::Ok(content) => content,
            Result::Err(SiteflowError::NotFound(_)) => return,
            Result::Err(e) => {
                tracing::warn!(error = %e, "failed to read Caddyfile");
                return;
            }
        };

        for route in parse_caddyfile(&content) {
            for (container, _port) in route.proxy_targets() {
                if !is_container_target(&container) {
                    continue;
                }
                let info = mapping.entry(container).or_default();
                for host in &route.hosts {
                    let domain = strip_scheme(host);
                    if !domain.is_empty() {
                        info.domains.insert(domain);
                    }
                }
                for target in &route.reverse_proxies {
                    info.targets.insert(target.clone());
                }
            }
        }
    }

    async fn assemble_site(
        &self,
        directory: &str,
        containers: &BTreeMap<String, ContainerStatus>,
        proxy_map: &BTreeMap<String, ProxyInfo>,
    ) -> SiteflowResult<Site> {
        let site_path = format!("{}/{}", self.layout.sites_root, directory);
        let compose_path = format!("{site_path}/{COMPOSE_FILENAME}");

        let compose_raw = match self.remote.read_file(&compose_path).await {
            Result::Ok(raw) => raw,
            Result::Err(SiteflowError::NotFound(_)) => String::new(),
            Result::Err(e) => return Err(e),
        };
        let doc = parse_compose(&compose_raw)?;

        let env_path = format!("{site_path}/{SITE_ENV_FILENAME}");
        let env_vars = match self.remote.read_file(&env_path).await {
            Result::Ok(raw) => parse_env_file(&raw),
            Result::Err(SiteflowError::NotFound(_)) => BTreeMap::new(),
            Result::Err(e) => return Err(e),
        };

        let services = build_services(directory, &doc, &env_vars);
        let matched = match_containers(directory, &services, containers);

        let mut domains = BTreeSet::new();
        let mut targets = BTreeSet::new();

        // Proxy labels declared on services, expanded from .env.
        for service in &services {
            if let Some(label) = service.labels.get("caddy") {
                let domain = strip_scheme(label);
                if !domain.is_empty() && !domain.starts_with('$') {
                    domains.insert(domain);
                }
            }
            if let Some(target) = service.labels.get("caddy.reverse_proxy") {
                targets.insert(target.clone());
            }
        }

        // Routes observed on the gateway for any plausible container name.
        for service in &services {
            let conventional = format!("{directory}-{}", service.name);
            let candidates = [
                service.container_name.as_deref(),
                Some(conventional.as_str()),
                Some(service.name.as_str()),
                Some(directory),
            ];
            for candidate in candidates.into_iter().flatten() {
                if let Some(info) = proxy_map.get(candidate) {
                    domains.extend(info.domains.iter().cloned());
                    targets.extend(info.targets.iter().cloned());
                    break;
                }
            }
        }
        for container in &matched {
            if let Some(info) = proxy_map.get(&container.name) {
                domains.extend(info.domains.iter().cloned());
                targets.extend(info.targets.iter().cloned());
            }
        }

        let status = derive_site_status(&matched);
        Ok(Site {
            name: directory.to_string(),
            path: site_path,
            compose_file: compose_path,
            services,
            containers: matched,
            domains: domains.into_iter().collect(),
            targets: targets.into_iter().collect(),
            status,
            meta: BTreeMap::new(),
        })
    }

    fn unknown_site(&self, directory: &str, error: &SiteflowError) -> Site {
        let site_path = format!("{}/{}", self.layout.sites_root, directory);
        let mut meta = BTreeMap::new();
        meta.insert("error".to_string(), error.to_string());
        Site {
            name: directory.to_string(),
            path: site_path.clone(),
            compose_file: format!("{site_path}/{COMPOSE_FILENAME}"),
            services: Vec::new(),
            containers: Vec::new(),
            domains: Vec::new(),
            targets: Vec::new(),
            status: SiteStatus::Unknown,
            meta,
        }
    }

}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Matches declared services against live containers by explicit name or
/// service key, preserving container-name order.
fn match_containers(
    site: &str,
    services: &[SiteService],
    containers: &BTreeMap<String, ContainerStatus>,
) -> Vec<ContainerStatus> {
    let mut matched: BTreeMap<String, ContainerStatus> = BTreeMap::new();
    for service in services {
        let conventional = format!("{site}-{}", service.name);
        let candidates = [
            service.container_name.as_deref(),
            Some(conventional.as_str()),
            Some(service.name.as_str()),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(container) = containers.get(candidate) {
                matched.insert(container.name.clone(), container.clone());
                break;
            }
        }
    }
    matched.into_values().collect()
}

fn strip_scheme(value: &str) -> String {
    value
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim()
        .to_string()
}

/// Whether a proxy target names a container (as opposed to an address or
/// external host with a scheme or port-only form).
fn is_container_target(target: &str) -> bool {
    !target.is_empty()
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        && !target.chars().all(|c| c.is_ascii_digit() || c == '.')
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
