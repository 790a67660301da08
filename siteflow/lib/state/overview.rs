use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::Utc;

use crate::{
    backups::{self, BackupStore, BackupSummary},
    config::{BackupThresholds, METRICS_CACHE_TTL},
    discovery::SiteScanner,
    graph::GraphBuilder,
    models::{ContainerMetrics, GraphResponse, SitesResponse},
    tunnel::TunnelService,
    SiteflowResult,
};

use super::TimedCache;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Aggregated, cached views over discovery, metrics, tunnel and backup
/// state. The HTTP handlers and the monitor loop both read through here so
/// they always agree on a snapshot.
pub struct Overview {
    scanner: SiteScanner,
    sites_cache: TimedCache<SitesResponse>,
    metrics_cache: TimedCache<BTreeMap<String, ContainerMetrics>>,
    tunnel: Arc<dyn TunnelService>,
    backups: Arc<BackupStore>,
    thresholds: BackupThresholds,
    builder: GraphBuilder,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Overview {
    /// Creates the aggregator.
    pub fn new(
        scanner: SiteScanner,
        cache_ttl: Duration,
        tunnel: Arc<dyn TunnelService>,
        backups: Arc<BackupStore>,
        thresholds: BackupThresholds,
    ) -> Self {
        Self {
            scanner,
            sites_cache: TimedCache::new(cache_ttl),
            metrics_cache: TimedCache::new(METRICS_CACHE_TTL),
            tunnel,
            backups,
            thresholds,
            builder: GraphBuilder::new(),
        }
    }

    /// The cached sites snapshot, refreshed when forced or expired.
    pub async fn sites(&self, force_refresh: bool) -> SiteflowResult<Arc<SitesResponse>> {
        self.sites_cache
            .get_with(force_refresh, || async {
                let sites = self.scanner.collect_sites().await?;
                Ok(SitesResponse {
                    sites,
                    updated_at: Utc::now(),
                })
            })
            .await
    }

    /// Cached container metrics.
    pub async fn metrics(
        &self,
        force_refresh: bool,
    ) -> SiteflowResult<Arc<BTreeMap<String, ContainerMetrics>>> {
        self.metrics_cache
            .get_with(force_refresh, || self.scanner.collect_metrics())
            .await
    }

    /// Builds the topology graph from the current snapshot and overlays.
    ///
    /// Overlay sources are independent collaborators; a failing one
    /// degrades its overlay rather than the graph.
    pub async fn graph(&self, force_refresh: bool) -> SiteflowResult<GraphResponse> {
        let sites = self.sites(force_refresh).await?;

        let metrics = match self.metrics(force_refresh).await {
            Result::Ok(metrics) => metrics,
            Result::Err(e) => {
                tracing::warn!(error = %e, "metrics unavailable, building graph without them");
                Arc::new(BTreeMap::new())
            }
        };

        let tunnel = match self.tunnel.status(force_refresh).await {
            Result::Ok(status) => status,
            Result::Err(e) => {
                tracing::warn!(error = %e, "tunnel status unavailable");
                Default::default()
            }
        };

        let backup_summary: Option<BackupSummary> =
            match backups::summary(&self.backups, &self.thresholds).await {
                Result::Ok(summary) if summary.sites.is_empty() => None,
                Result::Ok(summary) => Some(summary),
                Result::Err(e) => {
                    tracing::warn!(error = %e, "backup summary unavailable");
                    None
                }
            };

        Ok(self
            .builder
            .build(&sites.sites, &tunnel, &metrics, backup_summary.as_ref()))
    }

    /// Drops cached discovery and metrics state; called after any
    /// state-changing action succeeds.
    pub fn invalidate(&self) {
        self.sites_cache.invalidate();
        self.metrics_cache.invalidate();
    }

    /// The backup store backing the summary overlay.
    pub fn backups(&self) -> &Arc<BackupStore> {
        &self.backups
    }

    /// The thresholds used for backup health.
    pub fn thresholds(&self) -> &BackupThresholds {
        &self.thresholds
    }

    /// The tunnel provider.
    pub fn tunnel(&self) -> &Arc<dyn TunnelService> {
        &self.tunnel
    }
}
