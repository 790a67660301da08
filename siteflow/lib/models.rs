//! Core data model shared across the discovery pipeline, topology builder
//! and HTTP surface.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types: Sites
//--------------------------------------------------------------------------------------------------

/// Operational status of a site, derived purely from its containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    /// All matched containers report "Up".
    Running,
    /// No matched container reports "Up".
    Stopped,
    /// A mix of up and non-up containers.
    Degraded,
    /// No containers matched, or discovery failed for this site.
    Unknown,
}

/// A port mapping declared in compose or reported by the container engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Container-side port (may carry a protocol suffix source).
    pub private: String,
    /// Host-side port, if published.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub public: Option<String>,
    /// Transport protocol, defaults to tcp.
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

/// A service declared in a site's compose file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteService {
    /// Service key in the compose file.
    pub name: String,
    /// Explicit or conventional (`<site>-<service>`) container name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub container_name: Option<String>,
    /// Image reference, when declared.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image: Option<String>,
    /// Declared port mappings.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Labels with `${VAR}` references expanded from the site `.env`.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Environment entries.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// A live container as reported by the container engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Container name.
    pub name: String,
    /// Raw status text; begins with "Up" when healthy.
    pub status: String,
    /// Engine state field, when available.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<String>,
    /// Image the container runs.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image: Option<String>,
    /// Published port mappings.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
}

/// A discovered site: compose declaration joined with live containers and
/// reverse-proxy routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Unique site name (its directory name under the sites root).
    pub name: String,
    /// Absolute path of the site directory on the remote host.
    pub path: String,
    /// Absolute path of the site's compose file.
    pub compose_file: String,
    /// Declared services, ordered by name.
    #[serde(default)]
    pub services: Vec<SiteService>,
    /// Matched live containers, ordered by name.
    #[serde(default)]
    pub containers: Vec<ContainerStatus>,
    /// Domains routed to this site, ordered.
    #[serde(default)]
    pub domains: Vec<String>,
    /// Reverse-proxy targets for this site, ordered.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Derived status.
    pub status: SiteStatus,
    /// Auxiliary metadata; carries `error` when per-site discovery failed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

/// Aggregated discovery output with its collection timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitesResponse {
    /// Discovered sites, ordered by name.
    pub sites: Vec<Site>,
    /// When this snapshot was collected.
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Types: Metrics
//--------------------------------------------------------------------------------------------------

/// Resource metrics for a single container, as sampled from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetrics {
    /// Container name.
    pub container_name: String,
    /// CPU usage percentage.
    pub cpu_percent: f64,
    /// Memory in use, MB.
    pub memory_usage_mb: f64,
    /// Memory limit, MB.
    pub memory_limit_mb: f64,
    /// Memory usage percentage.
    pub memory_percent: f64,
}

//--------------------------------------------------------------------------------------------------
// Types: Graph
//--------------------------------------------------------------------------------------------------

/// Kind of a topology node. The declaration order is the sort rank used by
/// the deterministic projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// The ingress tunnel.
    Tunnel,
    /// A public domain.
    Domain,
    /// The reverse-proxy gateway.
    Gateway,
    /// A live container.
    Container,
    /// A discovered site.
    Site,
    /// The backup target.
    Nas,
}

/// Metrics overlay attached to container nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    /// CPU usage percentage.
    pub cpu_percent: f64,
    /// Memory usage percentage.
    pub memory_percent: f64,
    /// Memory in use, MB.
    pub memory_usage_mb: f64,
    /// Memory limit, MB.
    pub memory_limit_mb: f64,
}

/// Backup overlay attached to site nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBackupStatus {
    /// Aggregated backup health (`ok`, `warn`, `fail`).
    pub status: String,
    /// Seconds since the most recent successful backup, when one exists.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rpo_seconds: Option<i64>,
    /// End of the most recent successful backup run.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_backup: Option<DateTime<Utc>>,
}

/// A node in the topology graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable identifier, unique within the graph.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Node kind.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Status string (`running`, `stopped`, `degraded`, `unknown`, ...).
    pub status: String,
    /// Auxiliary metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    /// Metrics overlay, for container nodes with samples.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metrics: Option<NodeMetrics>,
    /// Backup overlay, for site nodes with backup records.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub backup: Option<NodeBackupStatus>,
}

/// A directed edge in the topology graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Stable identifier derived from source, target and label.
    pub id: String,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Optional edge label.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub label: Option<String>,
}

/// The projected topology graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphResponse {
    /// Nodes sorted by `(type rank, id)`.
    pub nodes: Vec<GraphNode>,
    /// Edges sorted by `(source, target, label)`.
    pub edges: Vec<GraphEdge>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Derives a site's status from its matched containers.
///
/// Empty container list means `Unknown`; all "Up" means `Running`; none "Up"
/// means `Stopped`; anything else is `Degraded`.
pub fn derive_site_status(containers: &[ContainerStatus]) -> SiteStatus {
    if containers.is_empty() {
        return SiteStatus::Unknown;
    }
    let up = containers
        .iter()
        .filter(|c| c.status.starts_with("Up"))
        .count();
    if up == containers.len() {
        SiteStatus::Running
    } else if up == 0 {
        SiteStatus::Stopped
    } else {
        SiteStatus::Degraded
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str, status: &str) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            status: status.to_string(),
            state: None,
            image: None,
            ports: vec![],
        }
    }

    #[test]
    fn test_derive_site_status_empty_is_unknown() {
        assert_eq!(derive_site_status(&[]), SiteStatus::Unknown);
    }

    #[test]
    fn test_derive_site_status_all_up_is_running() {
        let containers = vec![
            container("web", "Up 3 hours"),
            container("db", "Up 3 hours (healthy)"),
        ];
        assert_eq!(derive_site_status(&containers), SiteStatus::Running);
    }

    #[test]
    fn test_derive_site_status_none_up_is_stopped() {
        let containers = vec![
            container("web", "Exited (0) 2 days ago"),
            container("db", "Exited (137) 2 days ago"),
        ];
        assert_eq!(derive_site_status(&containers), SiteStatus::Stopped);
    }

    #[test]
    fn test_derive_site_status_mixed_is_degraded() {
        let containers = vec![
            container("web", "Up 10 minutes"),
            container("db", "Restarting (1) 5 seconds ago"),
        ];
        assert_eq!(derive_site_status(&containers), SiteStatus::Degraded);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SiteStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn test_node_type_rank_order() {
        assert!(NodeType::Tunnel < NodeType::Domain);
        assert!(NodeType::Domain < NodeType::Gateway);
        assert!(NodeType::Gateway < NodeType::Container);
        assert!(NodeType::Container < NodeType::Site);
        assert!(NodeType::Site < NodeType::Nas);
    }
}
