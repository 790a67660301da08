//! Shared fixtures: an in-memory mock of the managed host and inert
//! provider doubles, wired into a full `ServerState`.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use siteflow::{
    config::SiteflowConfig,
    discovery::parse_compose,
    health::{MonitorStatus, UptimeService},
    remote::{CommandOutput, Remote},
    server::ServerState,
    tunnel::{TunnelService, TunnelStatus},
    SiteflowError, SiteflowResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Mutable state of the mock host.
#[derive(Debug, Default)]
pub struct MockHost {
    /// Existing directories.
    pub dirs: BTreeSet<String>,
    /// Remote files by path.
    pub files: BTreeMap<String, String>,
    /// Containers currently reporting "Up".
    pub running: BTreeSet<String>,
    /// Containers currently reporting "Exited".
    pub stopped: BTreeSet<String>,
    /// Commands containing this substring fail with a transport error.
    pub fail_on: Option<String>,
    /// Every command the host saw, in order.
    pub log: Vec<String>,
    /// Delay applied to compose commands, for serialization tests.
    pub compose_delay: Duration,
}

/// A `Remote` backed by [`MockHost`].
pub struct MockRemote {
    pub host: Arc<StdMutex<MockHost>>,
}

/// A tunnel double recording its DNS and hostname registrations.
#[derive(Debug, Default)]
pub struct MockTunnelState {
    pub dns_records: BTreeSet<String>,
    pub hostnames: BTreeSet<String>,
    pub fail_dns: bool,
}

pub struct MockTunnel {
    pub state: Arc<StdMutex<MockTunnelState>>,
}

/// An uptime-service double recording its monitors.
#[derive(Debug, Default)]
pub struct MockUptimeState {
    pub monitors: BTreeSet<String>,
    pub fail_create: bool,
}

pub struct MockUptime {
    pub state: Arc<StdMutex<MockUptimeState>>,
}

/// The assembled fixture.
pub struct Fixture {
    pub state: ServerState,
    pub host: Arc<StdMutex<MockHost>>,
    pub tunnel: Arc<StdMutex<MockTunnelState>>,
    pub uptime: Arc<StdMutex<MockUptimeState>>,
    _db_dir: tempfile::TempDir,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MockHost {
    fn child_dirs(&self, root: &str) -> Vec<String> {
        let prefix = format!("{}/", root.trim_end_matches('/'));
        self.dirs
            .iter()
            .filter_map(|dir| {
                let rest = dir.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn ps_json(&self) -> String {
        let mut lines = Vec::new();
        for name in &self.running {
            lines.push(format!(
                r#"{{"Names":"{name}","Status":"Up 5 seconds","State":"running","Image":"mock:latest","Ports":""}}"#
            ));
        }
        for name in &self.stopped {
            lines.push(format!(
                r#"{{"Names":"{name}","Status":"Exited (0) 1 hour ago","State":"exited","Image":"mock:latest","Ports":""}}"#
            ));
        }
        lines.join("\n")
    }

    fn remove_prefix(&mut self, path: &str) {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.dirs.remove(path);
        self.dirs.retain(|dir| !dir.starts_with(&prefix));
        self.files.retain(|file, _| !file.starts_with(&prefix) && file != path);
    }

    /// Container names a site's compose file declares.
    fn compose_containers(&self, site_path: &str) -> Vec<String> {
        let site = site_path.rsplit('/').next().unwrap_or(site_path);
        let Some(raw) = self.files.get(&format!("{site_path}/docker-compose.yml")) else {
            return vec![site.to_string()];
        };
        let Ok(doc) = parse_compose(raw) else {
            return vec![site.to_string()];
        };
        doc.services
            .iter()
            .map(|(name, svc)| {
                svc.container_name
                    .clone()
                    .unwrap_or_else(|| format!("{site}-{name}"))
            })
            .collect()
    }
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: stdout.into(),
        stderr: String::new(),
        exit_code: 0,
        duration: Duration::from_millis(1),
    }
}

fn failed(stderr: impl Into<String>, exit_code: i32) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.into(),
        exit_code,
        duration: Duration::from_millis(1),
    }
}

impl MockRemote {
    fn respond(&self, cmd: &str) -> SiteflowResult<CommandOutput> {
        let mut host = self.host.lock().unwrap();
        if let Some(needle) = &host.fail_on {
            if cmd.contains(needle.as_str()) {
                return Err(SiteflowError::Transport(format!("injected failure: {needle}")));
            }
        }
        host.log.push(cmd.to_string());

        if let Some(rest) = cmd.strip_prefix("find ") {
            let root = rest.split_whitespace().next().unwrap_or("");
            let mut dirs = host.child_dirs(root);
            dirs.sort();
            return Ok(ok(dirs.join("\n")));
        }
        if cmd.contains("docker ps -a --format '{{json .}}'") {
            return Ok(ok(host.ps_json()));
        }
        if cmd.contains(".Label") {
            return Ok(ok(""));
        }
        if cmd.contains("docker stats") {
            return Ok(ok(""));
        }
        if cmd.contains("docker network ls") {
            return Ok(ok("web_proxy"));
        }
        if cmd.contains("docker network create") {
            return Ok(ok(""));
        }
        if let Some(rest) = cmd.strip_prefix("cat ") {
            let path = rest.trim();
            return match host.files.get(path) {
                Some(content) => Ok(ok(content.clone())),
                None => Ok(failed(
                    format!("cat: {path}: No such file or directory"),
                    1,
                )),
            };
        }
        if let Some(rest) = cmd.strip_prefix("test -d ") {
            let path = rest.split_whitespace().next().unwrap_or("");
            let exists = host.dirs.contains(path);
            return Ok(ok(if exists { "exists" } else { "missing" }));
        }
        if let Some(rest) = cmd.strip_prefix("test -e ") {
            let path = rest.split_whitespace().next().unwrap_or("");
            let exists = host.dirs.contains(path) || host.files.contains_key(path);
            return Ok(ok(if exists { "FOUND" } else { "NOT_FOUND" }));
        }
        if let Some(rest) = cmd.strip_prefix("mkdir -p ") {
            let (dirs, tail) = match rest.split_once(" && ") {
                Some((dirs, tail)) => (dirs, Some(tail)),
                None => (rest, None),
            };
            for path in dirs.split_whitespace() {
                host.dirs.insert(path.to_string());
            }
            if let Some(tail) = tail {
                drop(host);
                return self.respond(tail);
            }
            return Ok(ok(""));
        }
        if let Some(rest) = cmd.strip_prefix("rm -rf ") {
            for path in rest.split_whitespace() {
                if path == "&&" {
                    break;
                }
                host.remove_prefix(path);
            }
            // `rm -rf X && mkdir -p Y` / `rm -rf X && mv A B` composites.
            if let Some((_, tail)) = cmd.split_once("&& ") {
                drop(host);
                return self.respond(tail);
            }
            return Ok(ok(""));
        }
        if let Some(rest) = cmd.strip_prefix("mv ") {
            let mut parts = rest.split_whitespace();
            if let (Some(from), Some(to)) = (parts.next(), parts.next()) {
                if let Some(content) = host.files.remove(from) {
                    host.files.insert(to.to_string(), content);
                }
                if host.dirs.remove(from) {
                    host.dirs.insert(to.to_string());
                    let prefix = format!("{from}/");
                    let moved: Vec<(String, String)> = host
                        .files
                        .iter()
                        .filter(|(path, _)| path.starts_with(&prefix))
                        .map(|(path, content)| {
                            (path.replacen(from, to, 1), content.clone())
                        })
                        .collect();
                    host.files.retain(|path, _| !path.starts_with(&prefix));
                    for (path, content) in moved {
                        host.files.insert(path, content);
                    }
                }
            }
            return Ok(ok(""));
        }
        if cmd.contains("docker compose") {
            let delay = host.compose_delay;
            let site_path = cmd
                .strip_prefix("cd ")
                .and_then(|rest| rest.split_whitespace().next())
                .unwrap_or("")
                .to_string();
            let containers = host.compose_containers(&site_path);
            let up = cmd.contains("up -d");
            let down = cmd.contains("compose down");
            // Release the lock across the simulated compose runtime.
            drop(host);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let mut host = self.host.lock().unwrap();
            if down {
                for container in &containers {
                    host.running.remove(container);
                    host.stopped.insert(container.clone());
                }
            }
            if up {
                for container in &containers {
                    host.stopped.remove(container);
                    host.running.insert(container.clone());
                }
            }
            return Ok(ok("compose done"));
        }
        if cmd.contains("docker ps --filter name=") {
            let filter = cmd
                .split("name=")
                .nth(1)
                .and_then(|rest| rest.split_whitespace().next())
                .unwrap_or("");
            let statuses: Vec<&str> = host
                .running
                .iter()
                .filter(|name| name.contains(filter))
                .map(|_| "Up 5 seconds")
                .collect();
            return Ok(ok(statuses.join("\n")));
        }
        if cmd.contains("caddy validate") || cmd.contains("caddy reload") {
            return Ok(ok(""));
        }
        for action in ["start", "stop", "restart"] {
            if let Some(rest) = cmd.strip_prefix(&format!("docker {action} ")) {
                let name = rest.trim().to_string();
                if !host.running.contains(&name) && !host.stopped.contains(&name) {
                    return Ok(failed(format!("Error: No such container: {name}"), 1));
                }
                match action {
                    "stop" => {
                        host.running.remove(&name);
                        host.stopped.insert(name.clone());
                    }
                    _ => {
                        host.stopped.remove(&name);
                        host.running.insert(name.clone());
                    }
                }
                return Ok(ok(name));
            }
        }
        if cmd.starts_with("docker logs") {
            return Ok(ok("mock log line"));
        }
        if let Some(rest) = cmd.strip_prefix("ls -1a ") {
            let root = rest.split_whitespace().next().unwrap_or("");
            if !host.dirs.contains(root) {
                return Ok(ok("DIR_NOT_FOUND"));
            }
            let prefix = format!("{}/", root.trim_end_matches('/'));
            let mut entries: BTreeSet<String> = host.child_dirs(root).into_iter().collect();
            for file in host.files.keys() {
                if let Some(name) = file.strip_prefix(&prefix) {
                    if !name.contains('/') {
                        entries.insert(name.to_string());
                    }
                }
            }
            let listing: Vec<String> = entries.into_iter().collect();
            return Ok(ok(listing.join("\n")));
        }
        if cmd.starts_with("git ") || cmd.contains("git clone") {
            return Ok(ok("cloned"));
        }

        Ok(ok(""))
    }
}

#[async_trait]
impl Remote for MockRemote {
    async fn run(&self, cmd: &str, _timeout: Duration) -> SiteflowResult<CommandOutput> {
        self.respond(cmd)
    }

    async fn run_with_stdin(
        &self,
        cmd: &str,
        stdin: &[u8],
        _timeout: Duration,
    ) -> SiteflowResult<CommandOutput> {
        let mut host = self.host.lock().unwrap();
        if let Some(needle) = &host.fail_on {
            if cmd.contains(needle.as_str()) {
                return Err(SiteflowError::Transport(format!("injected failure: {needle}")));
            }
        }
        host.log.push(cmd.to_string());

        // Shapes: `cat > F` or `mkdir -p D && cat > F`.
        let mut rest = cmd;
        if let Some(stripped) = rest.strip_prefix("mkdir -p ") {
            let (dir, tail) = stripped.split_once(" && ").unwrap_or((stripped, ""));
            host.dirs.insert(dir.trim().to_string());
            rest = tail;
        }
        if let Some(path) = rest.trim().strip_prefix("cat > ") {
            host.files.insert(
                path.trim().to_string(),
                String::from_utf8_lossy(stdin).into_owned(),
            );
            return Ok(ok(""));
        }
        Ok(ok(""))
    }
}

#[async_trait]
impl TunnelService for MockTunnel {
    async fn status(&self, _force_refresh: bool) -> SiteflowResult<TunnelStatus> {
        Ok(TunnelStatus::default())
    }

    async fn add_dns_record(&self, domain: &str) -> SiteflowResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_dns {
            return Err(SiteflowError::Transport("dns provider down".to_string()));
        }
        state.dns_records.insert(domain.to_string());
        Ok(())
    }

    async fn remove_dns_record(&self, domain: &str) -> SiteflowResult<()> {
        if !self.state.lock().unwrap().dns_records.remove(domain) {
            return Err(SiteflowError::Integrity(format!(
                "DNS record for {domain} already absent"
            )));
        }
        Ok(())
    }

    async fn add_public_hostname(&self, domain: &str, _service_url: &str) -> SiteflowResult<()> {
        self.state.lock().unwrap().hostnames.insert(domain.to_string());
        Ok(())
    }

    async fn remove_public_hostname(&self, domain: &str) -> SiteflowResult<()> {
        if !self.state.lock().unwrap().hostnames.remove(domain) {
            return Err(SiteflowError::Integrity(format!(
                "tunnel hostname {domain} already absent"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UptimeService for MockUptime {
    async fn list_monitors(&self) -> BTreeMap<String, MonitorStatus> {
        BTreeMap::new()
    }

    async fn create_monitor(&self, name: &str, _url: &str) -> SiteflowResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(SiteflowError::Transport("monitor service down".to_string()));
        }
        state.monitors.insert(name.to_string());
        Ok(())
    }

    async fn delete_monitor(&self, name: &str) -> SiteflowResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.monitors.remove(name) {
            return Err(SiteflowError::NotFound(format!("monitor '{name}'")));
        }
        Ok(())
    }

    fn connected(&self) -> bool {
        true
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds a full server state over the mocks, with an empty sites root and
/// a Caddyfile in place.
pub async fn fixture() -> Fixture {
    let db_dir = tempfile::tempdir().unwrap();

    let mut config = SiteflowConfig::default();
    config.storage.db_path = db_dir.path().join("siteflow.db");
    config.layout.base_domain = "example.com".to_string();
    // Long TTL so tests control freshness explicitly with forced refreshes.
    config.runtime.cache_ttl_secs = 3600;

    let host = Arc::new(StdMutex::new(MockHost::default()));
    {
        let mut locked = host.lock().unwrap();
        locked.dirs.insert("/opt/sites".to_string());
        locked.dirs.insert("/opt/gateway".to_string());
        locked
            .files
            .insert("/opt/gateway/Caddyfile".to_string(), String::new());
    }

    let tunnel_state = Arc::new(StdMutex::new(MockTunnelState::default()));
    let uptime_state = Arc::new(StdMutex::new(MockUptimeState::default()));

    let state = ServerState::assemble(
        config,
        Arc::new(MockRemote { host: host.clone() }),
        Arc::new(MockTunnel {
            state: tunnel_state.clone(),
        }),
        Arc::new(MockUptime {
            state: uptime_state.clone(),
        }),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    Fixture {
        state,
        host,
        tunnel: tunnel_state,
        uptime: uptime_state,
        _db_dir: db_dir,
    }
}
