//! End-to-end provisioning scenarios over the mock host: the happy path,
//! rollback at each external step, idempotent deprovisioning and project
//! detection.

mod common;

use siteflow::{
    audit::AuditQuery,
    models::{NodeType, SiteStatus},
    provision::{
        Confidence, DeprovisionRequest, DetectRequest, ProvisionRequest, TemplateType,
    },
    SiteflowError,
};

fn provision_request(name: &str, template: TemplateType, domain: &str) -> ProvisionRequest {
    ProvisionRequest {
        name: name.to_string(),
        template,
        domain: Some(domain.to_string()),
        environment: Default::default(),
    }
}

#[tokio::test]
async fn test_provision_happy_path() {
    let fixture = common::fixture().await;
    let state = &fixture.state;

    let response = state
        .provisioner
        .provision(&provision_request(
            "blog",
            TemplateType::Wordpress,
            "blog.example.com",
        ))
        .await
        .unwrap();
    assert_eq!(response.status, "success");
    assert_eq!(response.domain, "blog.example.com");
    assert_eq!(response.path, "/opt/sites/blog");

    // The site shows up in discovery with both template containers up.
    let sites = state.overview.sites(true).await.unwrap();
    let blog = sites.sites.iter().find(|s| s.name == "blog").unwrap();
    assert_eq!(blog.status, SiteStatus::Running);
    assert_eq!(blog.containers.len(), 2);
    assert!(blog.containers.iter().any(|c| c.name == "blog"));
    assert!(blog.containers.iter().any(|c| c.name == "blog-mariadb"));
    assert!(blog.domains.contains(&"blog.example.com".to_string()));

    // The graph links domain → gateway → container → site.
    let graph = state.overview.graph(false).await.unwrap();
    let domain_node = graph
        .nodes
        .iter()
        .find(|n| n.node_type == NodeType::Domain)
        .unwrap();
    assert_eq!(domain_node.label, "blog.example.com");
    assert!(graph
        .edges
        .iter()
        .any(|e| e.source == "container-blog" && e.target == "site-blog"));

    // External resources are registered.
    let tunnel = fixture.tunnel.lock().unwrap();
    assert!(tunnel.dns_records.contains("blog.example.com"));
    assert!(tunnel.hostnames.contains("blog.example.com"));
    drop(tunnel);
    assert!(fixture.uptime.lock().unwrap().monitors.contains("blog"));

    // The proxy config carries the new route.
    let host = fixture.host.lock().unwrap();
    let caddyfile = host.files.get("/opt/gateway/Caddyfile").unwrap();
    assert!(caddyfile.contains("blog.example.com {"));
    assert!(caddyfile.contains("reverse_proxy blog:80"));
    drop(host);

    // The audit trail records a successful site_provision.
    let page = state
        .audit
        .query(&AuditQuery {
            target_name: Some("blog".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let entry = page
        .logs
        .iter()
        .find(|l| l.action_type == "site_provision")
        .unwrap();
    assert_eq!(entry.status, "success");
}

#[tokio::test]
async fn test_provision_rollback_on_monitor_failure() {
    let fixture = common::fixture().await;
    let state = &fixture.state;
    fixture.uptime.lock().unwrap().fail_create = true;

    let err = state
        .provisioner
        .provision(&provision_request(
            "blog",
            TemplateType::Wordpress,
            "blog.example.com",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, SiteflowError::Transport(_)));

    // No orphan resources: directory, route, DNS, hostname all gone.
    let host = fixture.host.lock().unwrap();
    assert!(!host.dirs.contains("/opt/sites/blog"));
    assert!(!host
        .files
        .get("/opt/gateway/Caddyfile")
        .unwrap()
        .contains("blog.example.com"));
    assert!(host.running.is_empty());
    drop(host);
    let tunnel = fixture.tunnel.lock().unwrap();
    assert!(tunnel.dns_records.is_empty());
    assert!(tunnel.hostnames.is_empty());
    drop(tunnel);
    assert!(fixture.uptime.lock().unwrap().monitors.is_empty());

    // Discovery no longer lists the site.
    let sites = state.overview.sites(true).await.unwrap();
    assert!(sites.sites.iter().all(|s| s.name != "blog"));

    // The audit entry is a failure naming the rollback.
    let page = state
        .audit
        .query(&AuditQuery {
            action_type: Some("site_provision".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.logs[0].status, "failure");
    assert!(page.logs[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("rolled back"));
}

#[tokio::test]
async fn test_provision_rollback_on_dns_failure_leaves_no_stack() {
    let fixture = common::fixture().await;
    let state = &fixture.state;
    fixture.tunnel.lock().unwrap().fail_dns = true;

    let err = state
        .provisioner
        .provision(&provision_request(
            "shop",
            TemplateType::Static,
            "shop.example.com",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, SiteflowError::Transport(_)));

    let host = fixture.host.lock().unwrap();
    // DNS fails before compose up: nothing was ever started.
    assert!(host.running.is_empty());
    assert!(!host.dirs.contains("/opt/sites/shop"));
}

#[tokio::test]
async fn test_provision_conflict_on_existing_site() {
    let fixture = common::fixture().await;
    let state = &fixture.state;
    fixture
        .host
        .lock()
        .unwrap()
        .dirs
        .insert("/opt/sites/blog".to_string());

    let err = state
        .provisioner
        .provision(&provision_request(
            "blog",
            TemplateType::Static,
            "blog.example.com",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, SiteflowError::Conflict(_)));
}

#[tokio::test]
async fn test_deprovision_removes_everything_and_is_idempotent() {
    let fixture = common::fixture().await;
    let state = &fixture.state;

    state
        .provisioner
        .provision(&provision_request(
            "blog",
            TemplateType::Wordpress,
            "blog.example.com",
        ))
        .await
        .unwrap();

    // Externally deleted resources must not fail the teardown: the
    // removals report integrity divergence and the flow proceeds.
    fixture.uptime.lock().unwrap().monitors.clear();
    {
        let mut tunnel = fixture.tunnel.lock().unwrap();
        tunnel.dns_records.clear();
        tunnel.hostnames.clear();
    }

    let response = state
        .provisioner
        .deprovision(&DeprovisionRequest {
            name: "blog".to_string(),
            remove_volumes: true,
            remove_files: true,
        })
        .await
        .unwrap();
    assert_eq!(response.status, "success");
    assert!(response.files_removed);

    let host = fixture.host.lock().unwrap();
    assert!(!host.dirs.contains("/opt/sites/blog"));
    assert!(host.running.is_empty());
    assert!(!host
        .files
        .get("/opt/gateway/Caddyfile")
        .unwrap()
        .contains("blog.example.com"));
    drop(host);
    let tunnel = fixture.tunnel.lock().unwrap();
    assert!(tunnel.dns_records.is_empty());
    assert!(tunnel.hostnames.is_empty());
    drop(tunnel);

    // A second deprovision finds no site.
    let err = state
        .provisioner
        .deprovision(&DeprovisionRequest {
            name: "blog".to_string(),
            remove_volumes: false,
            remove_files: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SiteflowError::NotFound(_)));
}

#[tokio::test]
async fn test_detection_order_and_confidence() {
    let fixture = common::fixture().await;
    let state = &fixture.state;

    {
        let mut host = fixture.host.lock().unwrap();
        host.dirs.insert("/srv/scan".to_string());
        host.files
            .insert("/srv/scan/package.json".to_string(), "{}".to_string());
        // A python marker too: the check order must still pick node.
        host.files
            .insert("/srv/scan/requirements.txt".to_string(), String::new());
    }

    let response = state
        .provisioner
        .detect_project_type(&DetectRequest {
            git_url: None,
            path: Some("/srv/scan".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(response.detected_type, TemplateType::Node);
    assert_eq!(response.confidence, Confidence::High);
    assert!(response.reason.contains("package.json"));
    assert!(response
        .files_checked
        .contains(&"package.json".to_string()));
}

#[tokio::test]
async fn test_detection_defaults_to_static() {
    let fixture = common::fixture().await;
    let state = &fixture.state;
    fixture.host.lock().unwrap().dirs.insert("/srv/empty".to_string());

    let response = state
        .provisioner
        .detect_project_type(&DetectRequest {
            git_url: None,
            path: Some("/srv/empty".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(response.detected_type, TemplateType::Static);
    assert_eq!(response.confidence, Confidence::Low);
}

#[tokio::test]
async fn test_detection_weak_wordpress_marker() {
    let fixture = common::fixture().await;
    let state = &fixture.state;
    {
        let mut host = fixture.host.lock().unwrap();
        host.dirs.insert("/srv/wp".to_string());
        host.dirs.insert("/srv/wp/wp-content".to_string());
    }

    let response = state
        .provisioner
        .detect_project_type(&DetectRequest {
            git_url: None,
            path: Some("/srv/wp".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(response.detected_type, TemplateType::Wordpress);
    assert_eq!(response.confidence, Confidence::Medium);
}
