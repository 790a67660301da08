//! Monitor-loop scenarios: fingerprint-gated publishing, in-order delivery
//! per connection, and the no-subscriber fast path.

mod common;

use siteflow::{
    hub::{ServerMessage, Topic},
    models::SiteStatus,
};

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

#[tokio::test]
async fn test_cycle_publishes_only_on_change() {
    let fixture = common::fixture().await;
    seed_site(&fixture, "blog");

    let (_handle, mut rx) = fixture.state.hub.register().unwrap();

    // First cycle: both envelopes, sites before graph.
    fixture.state.monitor.run_cycle().await.unwrap();
    let first = rx.recv().await.unwrap();
    let sites = match first {
        ServerMessage::SitesUpdate(sites) => sites,
        other => panic!("expected sites.update first, got {other:?}"),
    };
    assert_eq!(sites.sites.len(), 1);
    assert_eq!(sites.sites[0].status, SiteStatus::Running);
    assert!(matches!(rx.recv().await.unwrap(), ServerMessage::GraphUpdate(_)));

    // Second cycle with identical state: nothing is published.
    fixture.state.monitor.run_cycle().await.unwrap();
    assert!(rx.try_recv().is_err());

    // Stop the container: the next cycle reports the transition.
    {
        let mut host = fixture.host.lock().unwrap();
        host.running.remove("blog");
        host.stopped.insert("blog".to_string());
    }
    fixture.state.monitor.run_cycle().await.unwrap();
    match rx.recv().await.unwrap() {
        ServerMessage::SitesUpdate(sites) => {
            assert_eq!(sites.sites[0].status, SiteStatus::Stopped);
        }
        other => panic!("expected sites.update, got {other:?}"),
    }
    assert!(matches!(rx.recv().await.unwrap(), ServerMessage::GraphUpdate(_)));
}

#[tokio::test]
async fn test_cycle_skips_without_subscribers() {
    let fixture = common::fixture().await;
    seed_site(&fixture, "blog");

    fixture.state.monitor.run_cycle().await.unwrap();
    // No connection: the cycle must not even poll the host.
    assert!(fixture.host.lock().unwrap().log.is_empty());
}

#[tokio::test]
async fn test_force_broadcast_republishes_unchanged_state() {
    let fixture = common::fixture().await;
    seed_site(&fixture, "blog");

    let (_handle, mut rx) = fixture.state.hub.register().unwrap();
    fixture.state.monitor.run_cycle().await.unwrap();
    // Drain the initial pair.
    rx.recv().await.unwrap();
    rx.recv().await.unwrap();

    fixture.state.monitor.force_broadcast();
    fixture.state.monitor.run_cycle().await.unwrap();
    assert!(matches!(rx.recv().await.unwrap(), ServerMessage::SitesUpdate(_)));
    assert!(matches!(rx.recv().await.unwrap(), ServerMessage::GraphUpdate(_)));
}

#[tokio::test]
async fn test_topic_subscription_filters_updates() {
    let fixture = common::fixture().await;
    seed_site(&fixture, "blog");

    let (handle, mut rx) = fixture.state.hub.register().unwrap();
    handle.subscribe(Topic::Graph);

    fixture.state.monitor.run_cycle().await.unwrap();
    // Only the graph envelope is delivered to this connection.
    assert!(matches!(rx.recv().await.unwrap(), ServerMessage::GraphUpdate(_)));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_transport_error_is_contained() {
    let fixture = common::fixture().await;
    seed_site(&fixture, "blog");
    let (_handle, _rx) = fixture.state.hub.register().unwrap();

    fixture.host.lock().unwrap().fail_on = Some("find".to_string());
    // The cycle reports the failure; the loop itself would retry next tick.
    assert!(fixture.state.monitor.run_cycle().await.is_err());

    fixture.host.lock().unwrap().fail_on = None;
    fixture.state.monitor.run_cycle().await.unwrap();
}
