//! Action engine scenarios: per-site serialization, route editing with
//! rollback, container actions and their audit trail.

mod common;

use std::time::Duration;

use siteflow::{
    actions::{ContainerAction, SiteAction},
    audit::AuditQuery,
    SiteflowError,
};

/// Seeds a minimal static site with a running container.
fn seed_site(fixture: &common::Fixture, name: &str) {
    let mut host = fixture.host.lock().unwrap();
    host.dirs.insert(format!("/opt/sites/{name}"));
    host.files.insert(
        format!("/opt/sites/{name}/docker-compose.yml"),
        format!(
            "services:\n  web:\n    image: nginx:alpine\n    container_name: {name}\n"
        ),
    );
    host.running.insert(name.to_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_site_actions_serialize_per_site() {
    let fixture = common::fixture().await;
    seed_site(&fixture, "blog");
    fixture.host.lock().unwrap().compose_delay = Duration::from_millis(40);

    let engine_a = fixture.state.engine.clone();
    let engine_b = fixture.state.engine.clone();

    let start = tokio::spawn(async move { engine_a.site_action("blog", SiteAction::Start).await });
    // Give the first submission a head start so acquisition order is fixed.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let stop = tokio::spawn(async move { engine_b.site_action("blog", SiteAction::Stop).await });

    start.await.unwrap().unwrap();
    stop.await.unwrap().unwrap();

    // The submission order is preserved in the executed command stream:
    // everything belonging to `start` precedes everything of `stop`.
    let host = fixture.host.lock().unwrap();
    let up_index = host
        .log
        .iter()
        .position(|cmd| cmd.contains("compose up -d"))
        .unwrap();
    let down_index = host
        .log
        .iter()
        .position(|cmd| cmd.contains("compose down"))
        .unwrap();
    assert!(up_index < down_index);
    drop(host);

    // Both actions are audited and their intervals do not overlap.
    let page = fixture
        .state
        .audit
        .query(&AuditQuery {
            target_name: Some("blog".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut intervals: Vec<(chrono::DateTime<chrono::Utc>, f64)> = page
        .logs
        .iter()
        .filter(|l| l.action_type.starts_with("site_"))
        .map(|l| (l.timestamp, l.duration_ms.unwrap_or(0.0)))
        .collect();
    assert_eq!(intervals.len(), 2);
    intervals.sort_by_key(|(start, _)| *start);
    let first_end = intervals[0].0 + chrono::Duration::milliseconds(intervals[0].1 as i64);
    assert!(first_end <= intervals[1].0 + chrono::Duration::milliseconds(1));
}

#[tokio::test]
async fn test_container_actions_and_audit() {
    let fixture = common::fixture().await;
    seed_site(&fixture, "blog");

    let engine = &fixture.state.engine;
    engine
        .container_action("blog", ContainerAction::Stop)
        .await
        .unwrap();
    assert!(fixture.host.lock().unwrap().stopped.contains("blog"));

    engine
        .container_action("blog", ContainerAction::Start)
        .await
        .unwrap();
    assert!(fixture.host.lock().unwrap().running.contains("blog"));

    let logs = engine
        .container_action("blog", ContainerAction::Logs)
        .await
        .unwrap();
    assert_eq!(logs, "mock log line");

    let err = engine
        .container_action("ghost", ContainerAction::Stop)
        .await
        .unwrap_err();
    assert!(matches!(err, SiteflowError::NotFound(_)));

    let page = fixture
        .state
        .audit
        .query(&AuditQuery::default())
        .await
        .unwrap();
    // Four entries, newest first, ids strictly decreasing.
    assert_eq!(page.total, 4);
    assert!(page.logs.windows(2).all(|w| w[0].id > w[1].id));
    assert_eq!(page.logs[0].status, "failure");
    assert_eq!(page.logs[0].action_type, "container_stop");
}

#[tokio::test]
async fn test_route_roundtrip() {
    let fixture = common::fixture().await;
    let engine = &fixture.state.engine;

    engine.add_route("blog.example.com", "blog", 80).await.unwrap();
    let routes = engine.list_routes().await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].domain, "blog.example.com");
    assert_eq!(routes[0].container.as_deref(), Some("blog"));
    assert_eq!(routes[0].port, Some(80));

    // Duplicate domains are rejected before any write.
    let err = engine
        .add_route("blog.example.com", "other", 8080)
        .await
        .unwrap_err();
    assert!(matches!(err, SiteflowError::Conflict(_)));

    engine.remove_route("blog.example.com").await.unwrap();
    assert!(engine.list_routes().await.unwrap().is_empty());

    let err = engine.remove_route("blog.example.com").await.unwrap_err();
    assert!(matches!(err, SiteflowError::NotFound(_)));
}

#[tokio::test]
async fn test_route_write_is_atomic() {
    let fixture = common::fixture().await;
    fixture.state.engine.add_route("a.example.com", "a-site", 80).await.unwrap();

    // The temp file was renamed away, not left behind.
    let host = fixture.host.lock().unwrap();
    assert!(!host.files.contains_key("/opt/gateway/Caddyfile.siteflow-tmp"));
    assert!(host
        .files
        .get("/opt/gateway/Caddyfile")
        .unwrap()
        .contains("a.example.com"));
    // The write went through the temp-then-rename sequence.
    assert!(host.log.iter().any(|cmd| cmd.starts_with("mv ")
        && cmd.contains("Caddyfile.siteflow-tmp")));
}

#[tokio::test]
async fn test_site_action_unknown_site() {
    let fixture = common::fixture().await;
    let err = fixture
        .state
        .engine
        .site_action("ghost", SiteAction::Start)
        .await
        .unwrap_err();
    assert!(matches!(err, SiteflowError::NotFound(_)));
}

#[tokio::test]
async fn test_set_site_domain_rewrites_env() {
    let fixture = common::fixture().await;
    seed_site(&fixture, "blog");
    fixture.host.lock().unwrap().files.insert(
        "/opt/sites/blog/.env".to_string(),
        "DOMAIN=old.example.com\nOTHER=1\n".to_string(),
    );

    fixture
        .state
        .engine
        .set_site_domain("blog", "new.example.com")
        .await
        .unwrap();

    let host = fixture.host.lock().unwrap();
    let env = host.files.get("/opt/sites/blog/.env").unwrap();
    assert!(env.contains("DOMAIN=new.example.com"));
    assert!(env.contains("OTHER=1"));
    assert!(!env.contains("old.example.com"));
}
