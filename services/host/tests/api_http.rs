//! End-to-end tests driving the real HTTP server over a loopback socket
//! (spec.md §6 REST surface), in the style of the teacher's
//! `services/server/tests/http_*.rs` suite.

use apphost::config::Config;
use apphost::manager::AppManager;
use apphost::server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn spawn_server() -> (SocketAddr, tokio::sync::watch::Sender<bool>, Arc<AppManager>) {
    let mut config = Config::default();
    config.bind_addr = "127.0.0.1:0".parse().unwrap();
    config.app_base_dir = std::env::temp_dir().join(format!("apphost-api-test-{}", std::process::id()));

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let manager = Arc::new(AppManager::new(config));
    let (tx, rx) = tokio::sync::watch::channel(false);
    let server_manager = manager.clone();
    tokio::spawn(server::run(addr, server_manager, rx));
    // Give the listener a moment to bind before the test issues requests.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, tx, manager)
}

#[tokio::test]
async fn list_is_empty_for_a_fresh_registry() {
    let (addr, _shutdown, _manager) = spawn_server().await;
    let resp = reqwest::get(format!("http://{addr}/@api/list")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn stat_on_unknown_app_is_404_with_an_error_envelope() {
    let (addr, _shutdown, _manager) = spawn_server().await;
    let resp = reqwest::get(format!("http://{addr}/@api/stat/ghost")).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn control_post_on_unknown_app_is_404() {
    let (addr, _shutdown, _manager) = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/@api/control/ghost"))
        .body("START")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn control_put_with_missing_name_and_malformed_body_is_400() {
    let (addr, _shutdown, _manager) = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .put(format!("http://{addr}/@api/control/demo"))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn unknown_route_falls_through_to_404() {
    let (addr, _shutdown, _manager) = spawn_server().await;
    let resp = reqwest::get(format!("http://{addr}/not/a/route")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn keep_alive_connection_serves_two_requests_in_sequence() {
    let (addr, _shutdown, _manager) = spawn_server().await;
    let client = reqwest::Client::builder().build().unwrap();
    for _ in 0..2 {
        let resp = client.get(format!("http://{addr}/@api/list")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
    }
}
