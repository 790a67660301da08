//! Periodic state-diff loop.
//!
//! One cooperative task re-polls the remote host every cycle, fingerprints
//! the sites and graph responses and publishes `sites.update` /
//! `graph.update` envelopes only when a fingerprint changed. Transport
//! errors are logged once and retried on the next cycle; the cycle itself
//! paces retry.

use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    graph::canonical_fingerprint,
    hub::{Hub, ServerMessage, Topic},
    state::Overview,
    SiteflowResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The monitor loop.
pub struct SiteMonitor {
    overview: Arc<Overview>,
    hub: Arc<Hub>,
    interval: Duration,
    cancel: CancellationToken,
    fingerprints: StdMutex<Fingerprints>,
}

#[derive(Default)]
struct Fingerprints {
    sites: Option<String>,
    graph: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SiteMonitor {
    /// Creates a monitor over the shared state views and hub.
    pub fn new(
        overview: Arc<Overview>,
        hub: Arc<Hub>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            overview,
            hub,
            interval,
            cancel,
            fingerprints: StdMutex::new(Fingerprints::default()),
        })
    }

    /// Spawns the loop. It stops when the cancellation token fires; during
    /// shutdown it is stopped before the hub drains.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            tracing::info!(interval_secs = monitor.interval.as_secs(), "site monitor started");
            loop {
                tokio::select! {
                    _ = monitor.cancel.cancelled() => break,
                    _ = tokio::time::sleep(monitor.interval) => {}
                }
                if let Err(e) = monitor.run_cycle().await {
                    tracing::warn!(error = %e, "monitor cycle failed");
                }
            }
            tracing::info!("site monitor stopped");
        })
    }

    /// Runs one cycle: forced re-poll, fingerprint, publish on change.
    ///
    /// Skips entirely while no client is connected.
    pub async fn run_cycle(&self) -> SiteflowResult<()> {
        if self.hub.connection_count() == 0 {
            return Ok(());
        }

        let sites = self.overview.sites(true).await?;
        let sites_fingerprint = canonical_fingerprint(&sites.sites)?;
        let sites_changed = {
            let mut fingerprints = self.fingerprints.lock().expect("fingerprints poisoned");
            let changed = fingerprints.sites.as_deref() != Some(sites_fingerprint.as_str());
            fingerprints.sites = Some(sites_fingerprint);
            changed
        };
        if sites_changed {
            self.hub
                .publish(Topic::Sites, &ServerMessage::SitesUpdate((*sites).clone()));
            tracing::debug!("published sites.update");
        }

        // The sites cache is fresh from this cycle; the graph reuses it and
        // pulls its own overlays.
        let graph = self.overview.graph(false).await?;
        let graph_fingerprint = canonical_fingerprint(&graph)?;
        let graph_changed = {
            let mut fingerprints = self.fingerprints.lock().expect("fingerprints poisoned");
            let changed = fingerprints.graph.as_deref() != Some(graph_fingerprint.as_str());
            fingerprints.graph = Some(graph_fingerprint);
            changed
        };
        if graph_changed {
            self.hub.publish(Topic::Graph, &ServerMessage::GraphUpdate(graph));
            tracing::debug!("published graph.update");
        }

        Ok(())
    }

    /// Forgets the previous fingerprints so the next cycle republishes
    /// regardless of change; used after actions mutate state.
    pub fn force_broadcast(&self) {
        let mut fingerprints = self.fingerprints.lock().expect("fingerprints poisoned");
        *fingerprints = Fingerprints::default();
    }
}
