//! Configuration types, defaults and validation.
//!
//! The daemon reads a YAML config file (`siteflow.yaml` by default, or the
//! path in `SITEFLOW_CONFIG`). Secrets may instead be supplied through the
//! environment (`SITEFLOW_CF_API_TOKEN`, `SITEFLOW_UPTIME_PASSWORD`), which
//! takes precedence over file values so config files can be committed.

mod defaults;
mod validate;

use std::path::{Path, PathBuf};

use getset::Getters;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    utils::{SITEFLOW_CONFIG_ENV_VAR, SITEFLOW_CONFIG_FILENAME},
    SiteflowResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The siteflow daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct SiteflowConfig {
    /// Managed host and SSH credentials.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Remote filesystem layout.
    #[serde(default)]
    pub layout: LayoutConfig,

    /// HTTP surface binding.
    #[serde(default)]
    pub http: HttpConfig,

    /// DNS and tunnel provider credentials.
    #[serde(default)]
    pub cloudflare: CloudflareConfig,

    /// Uptime monitor service connection.
    #[serde(default)]
    pub uptime: UptimeConfig,

    /// Embedded database and retention.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Cache, monitor-loop and hub tuning.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Backup freshness thresholds.
    #[serde(default)]
    pub backup_thresholds: BackupThresholds,
}

/// Managed host and SSH credentials.
#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct RemoteConfig {
    /// Hostname or address of the managed host.
    #[serde(default)]
    pub host: String,

    /// SSH user.
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Path to the SSH private key.
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Number of pooled sessions.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Seconds before an idle session is closed.
    #[serde(default = "default_idle_grace_secs")]
    pub idle_grace_secs: u64,
}

/// Remote filesystem layout.
#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct LayoutConfig {
    /// Root directory containing one subdirectory per site.
    #[serde(default = "default_sites_root")]
    pub sites_root: String,

    /// Root directory of the gateway deployment.
    #[serde(default = "default_gateway_root")]
    pub gateway_root: String,

    /// Path of the Caddyfile consumed by the gateway.
    #[serde(default = "default_caddyfile_path")]
    pub caddyfile_path: String,

    /// Site directories discovery must skip.
    #[serde(default = "default_denylist")]
    pub discovery_denylist: Vec<String>,

    /// Base domain for default site hostnames (`<name>.<base_domain>`).
    #[serde(default)]
    pub base_domain: String,
}

/// HTTP surface binding.
#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct HttpConfig {
    /// Bind host.
    #[serde(default = "default_http_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_http_port")]
    pub port: u16,
}

/// DNS and tunnel provider credentials. All-empty means the provider is
/// inert and provisioning skips the external steps.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct CloudflareConfig {
    /// Account identifier.
    #[serde(default)]
    pub account_id: Option<String>,

    /// API token; `SITEFLOW_CF_API_TOKEN` overrides.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Tunnel identifier.
    #[serde(default)]
    pub tunnel_id: Option<String>,

    /// DNS zone identifier.
    #[serde(default)]
    pub zone_id: Option<String>,
}

/// Uptime monitor service connection.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct UptimeConfig {
    /// WebSocket URL of the uptime monitor service.
    #[serde(default)]
    pub url: Option<String>,

    /// Login username.
    #[serde(default)]
    pub username: Option<String>,

    /// Login password; `SITEFLOW_UPTIME_PASSWORD` overrides.
    #[serde(default)]
    pub password: Option<String>,

    /// Number of heartbeat bars used for uptime percentages.
    #[serde(default = "default_heartbeat_window")]
    pub heartbeat_window: usize,
}

/// Embedded database and retention settings.
#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct StorageConfig {
    /// Path of the sqlite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Days audit entries and backup runs are retained.
    #[serde(default = "default_retention_days")]
    pub audit_retention_days: i64,

    /// Cap on captured output in audit entries.
    #[serde(default = "default_max_output_len")]
    pub audit_max_output_length: usize,
}

/// Cache, monitor-loop and hub tuning.
#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct RuntimeConfig {
    /// Discovery cache TTL in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Monitor loop interval in seconds.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Per-connection outbound queue capacity.
    #[serde(default = "default_hub_queue_capacity")]
    pub hub_queue_capacity: usize,

    /// Seconds a silent connection is kept before being closed.
    #[serde(default = "default_hub_idle_timeout_secs")]
    pub hub_idle_timeout_secs: u64,
}

/// Freshness thresholds for backup health.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct BackupThresholds {
    /// Hours within which a db backup is fresh.
    #[serde(default = "default_db_fresh_hours")]
    pub db_fresh_hours: i64,

    /// Hours within which an uploads backup is fresh.
    #[serde(default = "default_uploads_fresh_hours")]
    pub uploads_fresh_hours: i64,

    /// Days within which a verify run is fresh.
    #[serde(default = "default_verify_fresh_days")]
    pub verify_fresh_days: i64,

    /// Days within which a snapshot run is fresh.
    #[serde(default = "default_snapshot_fresh_days")]
    pub snapshot_fresh_days: i64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SiteflowConfig {
    /// Loads the configuration from the given path, or from the default
    /// location when `path` is `None`, then applies environment overrides
    /// and validates.
    pub async fn load(path: Option<&Path>) -> SiteflowResult<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => resolve_config_path(),
        };

        let mut config: SiteflowConfig = if path.exists() {
            let raw = fs::read_to_string(&path).await?;
            serde_yaml::from_str(&raw)?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            SiteflowConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides for secrets.
    fn apply_env_overrides(&mut self) {
        if let Result::Ok(token) = std::env::var("SITEFLOW_CF_API_TOKEN") {
            if !token.is_empty() {
                self.cloudflare.api_token = Some(token);
            }
        }
        if let Result::Ok(password) = std::env::var("SITEFLOW_UPTIME_PASSWORD") {
            if !password.is_empty() {
                self.uptime.password = Some(password);
            }
        }
    }

    /// Whether the DNS/tunnel provider is fully configured.
    pub fn cloudflare_configured(&self) -> bool {
        self.cloudflare.account_id.is_some()
            && self.cloudflare.api_token.is_some()
            && self.cloudflare.tunnel_id.is_some()
    }

    /// Whether the uptime monitor connection is configured.
    pub fn uptime_configured(&self) -> bool {
        self.uptime.url.is_some()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Resolves the config path from `SITEFLOW_CONFIG` or the working directory.
pub fn resolve_config_path() -> PathBuf {
    if let Result::Ok(path) = std::env::var(SITEFLOW_CONFIG_ENV_VAR) {
        return PathBuf::from(path);
    }
    PathBuf::from(SITEFLOW_CONFIG_FILENAME)
}

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_pool_size() -> usize {
    DEFAULT_SSH_POOL_SIZE
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_secs()
}

fn default_idle_grace_secs() -> u64 {
    DEFAULT_SSH_IDLE_GRACE.as_secs()
}

fn default_sites_root() -> String {
    DEFAULT_SITES_ROOT.to_string()
}

fn default_gateway_root() -> String {
    DEFAULT_GATEWAY_ROOT.to_string()
}

fn default_caddyfile_path() -> String {
    DEFAULT_CADDYFILE_PATH.to_string()
}

fn default_denylist() -> Vec<String> {
    DEFAULT_DISCOVERY_DENYLIST
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_http_host() -> String {
    DEFAULT_HTTP_HOST.to_string()
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_heartbeat_window() -> usize {
    DEFAULT_HEARTBEAT_WINDOW
}

fn default_db_path() -> PathBuf {
    PathBuf::from(crate::utils::DB_FILENAME)
}

fn default_retention_days() -> i64 {
    DEFAULT_AUDIT_RETENTION_DAYS
}

fn default_max_output_len() -> usize {
    DEFAULT_AUDIT_MAX_OUTPUT_LEN
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL.as_secs()
}

fn default_monitor_interval_secs() -> u64 {
    DEFAULT_MONITOR_INTERVAL.as_secs()
}

fn default_hub_queue_capacity() -> usize {
    DEFAULT_HUB_QUEUE_CAPACITY
}

fn default_hub_idle_timeout_secs() -> u64 {
    DEFAULT_HUB_IDLE_TIMEOUT.as_secs()
}

fn default_db_fresh_hours() -> i64 {
    DEFAULT_DB_FRESH_HOURS
}

fn default_uploads_fresh_hours() -> i64 {
    DEFAULT_UPLOADS_FRESH_HOURS
}

fn default_verify_fresh_days() -> i64 {
    DEFAULT_VERIFY_FRESH_DAYS
}

fn default_snapshot_fresh_days() -> i64 {
    DEFAULT_SNAPSHOT_FRESH_DAYS
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for SiteflowConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty config deserializes")
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty remote config deserializes")
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty layout config deserializes")
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty http config deserializes")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty storage config deserializes")
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty runtime config deserializes")
    }
}

impl Default for BackupThresholds {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty thresholds deserialize")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
