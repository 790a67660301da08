use std::collections::{BTreeMap, BTreeSet};

use crate::{
    backups::{BackupHealth, BackupSummary},
    models::{
        ContainerMetrics, ContainerStatus, GraphEdge, GraphNode, GraphResponse, NodeBackupStatus,
        NodeMetrics, NodeType, Site,
    },
    tunnel::TunnelStatus,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Node id of the ingress tunnel.
pub const TUNNEL_NODE_ID: &str = "tunnel";

/// Node id of the reverse-proxy gateway.
pub const GATEWAY_NODE_ID: &str = "gateway";

/// Node id of the backup target.
pub const NAS_NODE_ID: &str = "nas";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Projects discovery output into the topology graph.
///
/// The projection is deterministic: nodes sort by `(type rank, id)`, edges
/// by `(source, target, label)`, so identical inputs serialize identically
/// and the monitor loop can fingerprint the result.
#[derive(Debug, Default)]
pub struct GraphBuilder;

struct Projection {
    nodes: BTreeMap<String, GraphNode>,
    edges: BTreeSet<(String, String, Option<String>)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GraphBuilder {
    /// Creates a builder.
    pub fn new() -> Self {
        Self
    }

    /// Builds the graph from a discovery snapshot and its overlays.
    pub fn build(
        &self,
        sites: &[Site],
        tunnel: &TunnelStatus,
        metrics: &BTreeMap<String, ContainerMetrics>,
        backups: Option<&BackupSummary>,
    ) -> GraphResponse {
        let mut projection = Projection {
            nodes: BTreeMap::new(),
            edges: BTreeSet::new(),
        };

        projection.add_gateway();
        if let Some(info) = &tunnel.tunnel {
            projection.add_tunnel(&info.name, info.connections.len());
        }

        let backup_by_site: BTreeMap<&str, &crate::backups::SiteBackupStatus> = backups
            .map(|summary| {
                summary
                    .sites
                    .iter()
                    .map(|status| (status.site.as_str(), status))
                    .collect()
            })
            .unwrap_or_default();
        if backups.is_some() {
            projection.add_nas(&backup_by_site);
        }

        for site in sites {
            projection.add_site(site, metrics, backup_by_site.get(site.name.as_str()).copied());
        }

        projection.finish()
    }
}

impl Projection {
    fn add_node(&mut self, node: GraphNode) {
        self.nodes.entry(node.id.clone()).or_insert(node);
    }

    fn add_edge(&mut self, source: &str, target: &str, label: Option<&str>) {
        self.edges.insert((
            source.to_string(),
            target.to_string(),
            label.map(str::to_string),
        ));
    }

    fn add_gateway(&mut self) {
        self.add_node(GraphNode {
            id: GATEWAY_NODE_ID.to_string(),
            label: "Caddy Gateway".to_string(),
            node_type: NodeType::Gateway,
            status: "running".to_string(),
            meta: BTreeMap::new(),
            metrics: None,
            backup: None,
        });
    }

    fn add_tunnel(&mut self, name: &str, connections: usize) {
        let mut meta = BTreeMap::new();
        meta.insert("tunnel".to_string(), name.to_string());
        meta.insert("connections".to_string(), connections.to_string());
        self.add_node(GraphNode {
            id: TUNNEL_NODE_ID.to_string(),
            label: "Tunnel".to_string(),
            node_type: NodeType::Tunnel,
            status: if connections > 0 { "running" } else { "degraded" }.to_string(),
            meta,
            metrics: None,
            backup: None,
        });
    }

    fn add_nas(&mut self, backups: &BTreeMap<&str, &crate::backups::SiteBackupStatus>) {
        let status = if backups.is_empty() {
            "unknown"
        } else if backups
            .values()
            .any(|s| s.overall_status != BackupHealth::Ok)
        {
            "degraded"
        } else {
            "running"
        };
        let mut meta = BTreeMap::new();
        meta.insert("backup_count".to_string(), backups.len().to_string());
        self.add_node(GraphNode {
            id: NAS_NODE_ID.to_string(),
            label: "Backup Target".to_string(),
            node_type: NodeType::Nas,
            status: status.to_string(),
            meta,
            metrics: None,
            backup: None,
        });
    }

    fn add_site(
        &mut self,
        site: &Site,
        metrics: &BTreeMap<String, ContainerMetrics>,
        backup: Option<&crate::backups::SiteBackupStatus>,
    ) {
        let site_node_id = format!("site-{}", site.name);
        let site_status = serde_json::to_value(site.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());

        let mut meta = BTreeMap::new();
        meta.insert("path".to_string(), site.path.clone());
        meta.insert("services".to_string(), site.services.len().to_string());
        if let Some(error) = site.meta.get("error") {
            meta.insert("error".to_string(), error.clone());
        }

        let backup_overlay = backup.map(|status| NodeBackupStatus {
            status: status.overall_status.as_str().to_string(),
            rpo_seconds: status.rpo_seconds_db.or(status.rpo_seconds_uploads),
            last_backup: status.last_db_run.as_ref().map(|run| run.ended_at),
        });

        self.add_node(GraphNode {
            id: site_node_id.clone(),
            label: format!("Site: {}", site.name),
            node_type: NodeType::Site,
            status: site_status.clone(),
            meta,
            metrics: None,
            backup: backup_overlay,
        });

        if backup.is_some() {
            self.add_edge(&site_node_id, NAS_NODE_ID, Some("backup"));
        }

        // Containers the gateway actually proxies to; when the site's
        // targets name none of them, fall back to all of them.
        let target_containers: BTreeSet<String> = site
            .targets
            .iter()
            .filter_map(|target| {
                target
                    .split('/')
                    .next()
                    .and_then(|t| t.split(':').next())
                    .map(str::to_string)
            })
            .collect();
        let proxied: BTreeSet<&str> = {
            let named: BTreeSet<&str> = site
                .containers
                .iter()
                .filter(|c| target_containers.contains(&c.name))
                .map(|c| c.name.as_str())
                .collect();
            if named.is_empty() {
                site.containers.iter().map(|c| c.name.as_str()).collect()
            } else {
                named
            }
        };

        for container in &site.containers {
            let container_node_id = format!("container-{}", container.name);
            let node_metrics = metrics.get(&container.name).map(|m| NodeMetrics {
                cpu_percent: m.cpu_percent,
                memory_percent: m.memory_percent,
                memory_usage_mb: m.memory_usage_mb,
                memory_limit_mb: m.memory_limit_mb,
            });

            let mut container_meta = BTreeMap::new();
            if let Some(image) = &container.image {
                container_meta.insert("image".to_string(), image.clone());
            }
            if !container.ports.is_empty() {
                let ports = container
                    .ports
                    .iter()
                    .map(|p| {
                        format!(
                            "{}->{}",
                            p.public.as_deref().unwrap_or("int"),
                            p.private
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                container_meta.insert("ports".to_string(), ports);
            }

            self.add_node(GraphNode {
                id: container_node_id.clone(),
                label: format!("Container: {}", container.name),
                node_type: NodeType::Container,
                status: container_status(container).to_string(),
                meta: container_meta,
                metrics: node_metrics,
                backup: None,
            });

            self.add_edge(&container_node_id, &site_node_id, Some("deployed as"));
            if proxied.contains(container.name.as_str()) {
                self.add_edge(GATEWAY_NODE_ID, &container_node_id, Some("reverse proxy"));
            }
        }

        for domain in &site.domains {
            let domain_node_id = format!("domain-{domain}");
            let mut domain_meta = BTreeMap::new();
            if !site.targets.is_empty() {
                domain_meta.insert("targets".to_string(), site.targets.join(", "));
            }
            self.add_node(GraphNode {
                id: domain_node_id.clone(),
                label: domain.clone(),
                node_type: NodeType::Domain,
                status: site_status.clone(),
                meta: domain_meta,
                metrics: None,
                backup: None,
            });
            if self.nodes.contains_key(TUNNEL_NODE_ID) {
                self.add_edge(TUNNEL_NODE_ID, &domain_node_id, Some("proxy"));
            }
            self.add_edge(&domain_node_id, GATEWAY_NODE_ID, Some("reverse proxy"));
        }
    }

    fn finish(self) -> GraphResponse {
        let mut nodes: Vec<GraphNode> = self.nodes.into_values().collect();
        nodes.sort_by(|a, b| {
            a.node_type
                .cmp(&b.node_type)
                .then_with(|| a.id.cmp(&b.id))
        });

        let edges = self
            .edges
            .into_iter()
            .map(|(source, target, label)| GraphEdge {
                id: match &label {
                    Some(label) => format!("{source}--{target}--{label}"),
                    None => format!("{source}--{target}"),
                },
                source,
                target,
                label,
            })
            .collect();

        GraphResponse { nodes, edges }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn container_status(container: &ContainerStatus) -> &'static str {
    if container.status.is_empty() {
        "unknown"
    } else if container.status.starts_with("Up") {
        "running"
    } else if container.status.starts_with("Exited") {
        "stopped"
    } else {
        "degraded"
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::models::{PortMapping, SiteStatus};
    use crate::tunnel::{TunnelConnector, TunnelInfo};

    use super::*;

    fn site_fixture() -> Site {
        Site {
            name: "blog".to_string(),
            path: "/opt/sites/blog".to_string(),
            compose_file: "/opt/sites/blog/docker-compose.yml".to_string(),
            services: vec![],
            containers: vec![
                ContainerStatus {
                    name: "blog".to_string(),
                    status: "Up 3 hours".to_string(),
                    state: Some("running".to_string()),
                    image: Some("wordpress:latest".to_string()),
                    ports: vec![PortMapping {
                        private: "80".to_string(),
                        public: Some("8080".to_string()),
                        protocol: "tcp".to_string(),
                    }],
                },
                ContainerStatus {
                    name: "blog-mariadb".to_string(),
                    status: "Up 3 hours".to_string(),
                    state: Some("running".to_string()),
                    image: Some("mariadb:11".to_string()),
                    ports: vec![],
                },
            ],
            domains: vec!["blog.example.com".to_string()],
            targets: vec!["blog:80".to_string()],
            status: SiteStatus::Running,
            meta: BTreeMap::new(),
        }
    }

    fn tunnel_fixture() -> TunnelStatus {
        TunnelStatus {
            tunnel: Some(TunnelInfo {
                id: "t-1".to_string(),
                name: "edge".to_string(),
                status: Some("healthy".to_string()),
                connections: vec![TunnelConnector {
                    id: "c-1".to_string(),
                    version: None,
                    location: None,
                }],
                hostnames: vec![],
            }),
        }
    }

    #[test]
    fn test_projection_shape() {
        let builder = GraphBuilder::new();
        let graph = builder.build(
            &[site_fixture()],
            &tunnel_fixture(),
            &BTreeMap::new(),
            None,
        );

        let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "tunnel",
                "domain-blog.example.com",
                "gateway",
                "container-blog",
                "container-blog-mariadb",
                "site-blog",
            ]
        );

        let has_edge = |s: &str, t: &str, l: &str| {
            graph
                .edges
                .iter()
                .any(|e| e.source == s && e.target == t && e.label.as_deref() == Some(l))
        };
        assert!(has_edge("tunnel", "domain-blog.example.com", "proxy"));
        assert!(has_edge("domain-blog.example.com", "gateway", "reverse proxy"));
        assert!(has_edge("gateway", "container-blog", "reverse proxy"));
        assert!(has_edge("container-blog", "site-blog", "deployed as"));
        assert!(has_edge("container-blog-mariadb", "site-blog", "deployed as"));
        // The db container is not a proxy target.
        assert!(!has_edge("gateway", "container-blog-mariadb", "reverse proxy"));
    }

    #[test]
    fn test_projection_is_deterministic() {
        let builder = GraphBuilder::new();
        let a = builder.build(&[site_fixture()], &tunnel_fixture(), &BTreeMap::new(), None);
        let b = builder.build(&[site_fixture()], &tunnel_fixture(), &BTreeMap::new(), None);
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn test_edges_are_sorted() {
        let builder = GraphBuilder::new();
        let graph = builder.build(&[site_fixture()], &tunnel_fixture(), &BTreeMap::new(), None);
        let keys: Vec<(&str, &str, Option<&str>)> = graph
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str(), e.label.as_deref()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_metrics_overlay_attaches() {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "blog".to_string(),
            ContainerMetrics {
                container_name: "blog".to_string(),
                cpu_percent: 2.5,
                memory_usage_mb: 100.0,
                memory_limit_mb: 1024.0,
                memory_percent: 9.8,
            },
        );
        let builder = GraphBuilder::new();
        let graph = builder.build(&[site_fixture()], &TunnelStatus::default(), &metrics, None);

        let container = graph.nodes.iter().find(|n| n.id == "container-blog").unwrap();
        let node_metrics = container.metrics.as_ref().unwrap();
        assert!((node_metrics.cpu_percent - 2.5).abs() < f64::EPSILON);

        // Without a tunnel there is no tunnel node and no tunnel edges.
        assert!(!graph.nodes.iter().any(|n| n.id == "tunnel"));
        assert!(!graph.edges.iter().any(|e| e.source == "tunnel"));
    }
}
