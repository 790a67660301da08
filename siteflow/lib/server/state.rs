//! Shared server state wiring.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    actions::ActionEngine,
    audit::{AuditRecorder, AuditStore},
    backups::BackupStore,
    config::SiteflowConfig,
    discovery::SiteScanner,
    health::{UptimeAdapter, UptimeService},
    hub::Hub,
    monitor::SiteMonitor,
    provision::Provisioner,
    remote::{Remote, SshExecutor, TargetLocks},
    state::Overview,
    store,
    tunnel::{CloudflareClient, TunnelService},
    SiteflowResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Shared state handed to every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct ServerState {
    /// Daemon configuration.
    pub config: Arc<SiteflowConfig>,
    /// The action engine.
    pub engine: Arc<ActionEngine>,
    /// The provisioner.
    pub provisioner: Arc<Provisioner>,
    /// Aggregated state views.
    pub overview: Arc<Overview>,
    /// The subscription hub.
    pub hub: Arc<Hub>,
    /// The monitor loop handle.
    pub monitor: Arc<SiteMonitor>,
    /// The audit store.
    pub audit: Arc<AuditStore>,
    /// The backup run store.
    pub backups: Arc<BackupStore>,
    /// The uptime monitor adapter.
    pub uptime: Arc<dyn UptimeService>,
    /// Cancellation root for shutdown.
    pub cancel: CancellationToken,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ServerState {
    /// Builds production state from configuration: SSH executor, Cloudflare
    /// client and uptime adapter.
    pub async fn from_config(
        config: SiteflowConfig,
        cancel: CancellationToken,
    ) -> SiteflowResult<Self> {
        let remote: Arc<dyn Remote> = Arc::new(SshExecutor::new(config.remote.clone()));
        let tunnel: Arc<dyn TunnelService> =
            Arc::new(CloudflareClient::new(config.cloudflare.clone()));
        let uptime: Arc<dyn UptimeService> = Arc::new(UptimeAdapter::spawn(
            config.uptime.clone(),
            cancel.child_token(),
        ));
        Self::assemble(config, remote, tunnel, uptime, cancel).await
    }

    /// Assembles state from injected collaborators; tests pass mocks here.
    pub async fn assemble(
        config: SiteflowConfig,
        remote: Arc<dyn Remote>,
        tunnel: Arc<dyn TunnelService>,
        uptime: Arc<dyn UptimeService>,
        cancel: CancellationToken,
    ) -> SiteflowResult<Self> {
        let pool = store::init_db(&config.storage.db_path).await?;
        let audit = Arc::new(AuditStore::new(
            pool.clone(),
            config.storage.audit_max_output_length,
        ));
        let backups = Arc::new(BackupStore::new(pool));
        let recorder = AuditRecorder::new(audit.clone());

        let scanner = SiteScanner::new(remote.clone(), config.layout.clone());
        let overview = Arc::new(Overview::new(
            scanner,
            Duration::from_secs(config.runtime.cache_ttl_secs),
            tunnel.clone(),
            backups.clone(),
            config.backup_thresholds,
        ));

        let locks = TargetLocks::new();
        let engine = Arc::new(ActionEngine::new(
            remote.clone(),
            recorder,
            overview.clone(),
            locks,
            config.layout.clone(),
        ));
        let provisioner = Arc::new(Provisioner::new(
            remote,
            engine.clone(),
            tunnel,
            uptime.clone(),
            config.layout.clone(),
        ));

        let hub = Arc::new(Hub::new(config.runtime.hub_queue_capacity));
        let monitor = SiteMonitor::new(
            overview.clone(),
            hub.clone(),
            Duration::from_secs(config.runtime.monitor_interval_secs),
            cancel.child_token(),
        );

        Ok(Self {
            config: Arc::new(config),
            engine,
            provisioner,
            overview,
            hub,
            monitor,
            audit,
            backups,
            uptime,
            cancel,
        })
    }
}
