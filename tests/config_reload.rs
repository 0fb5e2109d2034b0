//! Hot reload of the policy file while the gateway is serving.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use fedi_gateway::config::{load_config, ConfigStore, ConfigWatcher};

mod common;

use common::{activity, post_activity, start_gateway_with_store, start_upstream};

/// Written with the legacy section names to exercise the aliases.
fn write_config(path: &Path, upstream_url: &str, max_cc: usize) {
    let body = serde_json::json!({
        "server": {"protocol": "tcp", "address": "127.0.0.1", "port": 8080},
        "proxy": {"protocol": "tcp", "url": upstream_url},
        "limit": {"cc": max_cc, "mentions": 20, "keywords": []},
    });
    std::fs::write(path, body.to_string()).unwrap();
}

async fn wait_for(store: &ConfigStore, max_cc: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while store.current().limits.max_cc != max_cc {
        assert!(tokio::time::Instant::now() < deadline, "reload to maxCc={} not observed", max_cc);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_reload_changes_verdicts_and_keeps_last_good_config() {
    let upstream = start_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    write_config(&path, &upstream.url(), 5);

    let mut config = load_config(&path).unwrap();
    assert_eq!(config.limits.max_cc, 5);
    config.listen.port = 0;

    let store = Arc::new(ConfigStore::new(config));
    let (watcher, updates) = ConfigWatcher::new(&path);
    let _watcher = watcher.run().unwrap();
    tokio::spawn(store.clone().apply_updates(updates));

    let gateway = start_gateway_with_store(store.clone()).await;
    let inbox = gateway.url("/inbox");

    let res = post_activity(&inbox, activity(6, 0, "hello")).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert_eq!(upstream.hits(), 0);

    // Raise the limit
    write_config(&path, &upstream.url(), 10);
    wait_for(&store, 10).await;

    let res = post_activity(&inbox, activity(6, 0, "hello")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(upstream.hits(), 1);

    // A broken file leaves the last good snapshot in place
    std::fs::write(&path, "{ \"limit\": ").unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(store.current().limits.max_cc, 10);

    let res = post_activity(&inbox, activity(11, 0, "hello")).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let res = post_activity(&inbox, activity(6, 0, "hello")).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_protocol_is_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{"listen": {"protocol": "sctp", "port": 8080}, "upstream": {"url": "http://127.0.0.1:3000"}}"#,
    )
    .unwrap();

    assert!(load_config(&path).is_err());
}
