use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default SSH port on the managed host.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// The default SSH user on the managed host.
pub const DEFAULT_SSH_USER: &str = "root";

/// The default number of pooled SSH sessions.
pub const DEFAULT_SSH_POOL_SIZE: usize = 4;

/// Grace period after which an idle SSH session is closed.
pub const DEFAULT_SSH_IDLE_GRACE: Duration = Duration::from_secs(300);

/// The default deadline for ordinary remote commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// The deadline for compose up/down invocations.
pub const COMPOSE_TIMEOUT: Duration = Duration::from_secs(120);

/// The deadline for git clone/fetch invocations.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(300);

/// The deadline for folder/zip uploads.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// The default root of site directories on the managed host.
pub const DEFAULT_SITES_ROOT: &str = "/opt/sites";

/// The default root of the gateway deployment on the managed host.
pub const DEFAULT_GATEWAY_ROOT: &str = "/opt/gateway";

/// The default Caddyfile path on the managed host.
pub const DEFAULT_CADDYFILE_PATH: &str = "/opt/gateway/Caddyfile";

/// Site directories never surfaced by discovery.
pub const DEFAULT_DISCOVERY_DENYLIST: &[&str] = &["gateway", "siteflow-dashboard"];

/// The default TTL of the discovery cache.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(20);

/// The TTL of the container metrics cache.
pub const METRICS_CACHE_TTL: Duration = Duration::from_secs(10);

/// The default monitor loop interval.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// The default per-connection outbound queue capacity.
pub const DEFAULT_HUB_QUEUE_CAPACITY: usize = 64;

/// Connections idle beyond this threshold are closed.
pub const DEFAULT_HUB_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Deadline for draining in-flight writes when a connection closes.
pub const HUB_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// The default audit retention period in days.
pub const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 90;

/// The default cap on captured output stored in an audit entry.
pub const DEFAULT_AUDIT_MAX_OUTPUT_LEN: usize = 10_000;

/// Default freshness threshold for database backups, hours.
pub const DEFAULT_DB_FRESH_HOURS: i64 = 26;

/// Default freshness threshold for uploads backups, hours.
pub const DEFAULT_UPLOADS_FRESH_HOURS: i64 = 30;

/// Default freshness threshold for verify runs, days.
pub const DEFAULT_VERIFY_FRESH_DAYS: i64 = 7;

/// Default freshness threshold for snapshot runs, days.
pub const DEFAULT_SNAPSHOT_FRESH_DAYS: i64 = 8;

/// The default heartbeat window used for uptime percentages.
pub const DEFAULT_HEARTBEAT_WINDOW: usize = 30;

/// The default bind address of the HTTP surface.
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";

/// The default port of the HTTP surface.
pub const DEFAULT_HTTP_PORT: u16 = 8700;

/// Upper bound on deploy upload payloads.
pub const MAX_UPLOAD_SIZE: usize = 100 * 1024 * 1024;

/// How long provisioning waits for the first container to report "Up".
pub const PROVISION_UP_TIMEOUT: Duration = Duration::from_secs(90);

/// Tail length captured by the container `logs` action.
pub const LOGS_TAIL_LINES: u32 = 200;
