//! Pattern bridge integration tests.
//!
//! These tests run a real pattern executable (the in-process
//! `PatternRunner`) against the control plane over WebSocket: handshake,
//! automatic initialize/start, health checks, and revocation with graceful
//! drain.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;

use prism_admin::PlacementStatus;
use prism_server::{create_router, AppState, PatternRunner, ServerConfig};

async fn start_test_server() -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(ServerConfig::default());
    let router = create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, state)
}

fn api(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

async fn setup_placement(client: &reqwest::Client, addr: SocketAddr) {
    client
        .post(api(addr, "/api/v1/launchers/register"))
        .json(&json!({
            "launcher_id": "L1",
            "address": "l:1",
            "max_processes": 4,
        }))
        .send()
        .await
        .unwrap();

    client
        .post(api(addr, "/api/v1/namespaces"))
        .json(&json!({
            "config": {
                "name": "devices",
                "pattern": "multicast-registry",
                "slots": {
                    "registry": { "backend": "memory" },
                    "messaging": { "backend": "memory" },
                },
                "behavior": { "retry_delay_ms": 10 },
            },
            "principal": "alice",
        }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(api(addr, "/api/v1/patterns/assign"))
        .json(&json!({
            "pattern_id": "pat-1",
            "pattern_type": "multicast-registry",
            "launcher_id": "L1",
            "namespace": "devices",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

fn spawn_runner(addr: SocketAddr) -> tokio::task::JoinHandle<anyhow::Result<()>> {
    let runner = PatternRunner {
        url: format!("ws://{}/api/v1/patterns/bridge", addr),
        pattern_id: "pat-1".to_string(),
        namespace: "devices".to_string(),
        pattern_type: "multicast-registry".to_string(),
        interfaces: vec!["prism.registry.v1".to_string()],
        drivers: prism_server::default_drivers(),
    };
    tokio::spawn(runner.run())
}

async fn wait_for_session(client: &reqwest::Client, addr: SocketAddr, pattern_id: &str) {
    for _ in 0..100 {
        let sessions: Value = client
            .get(api(addr, "/api/v1/patterns/sessions"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if sessions
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s["pattern_id"] == pattern_id)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("pattern {} never connected", pattern_id);
}

#[tokio::test]
async fn test_handshake_and_interface_declaration() {
    let (addr, _state) = start_test_server().await;
    let client = reqwest::Client::new();
    setup_placement(&client, addr).await;

    let runner = spawn_runner(addr);
    wait_for_session(&client, addr, "pat-1").await;

    let sessions: Value = client
        .get(api(addr, "/api/v1/patterns/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session = &sessions.as_array().unwrap()[0];
    assert_eq!(session["namespace"], "devices");
    assert_eq!(session["name"], "multicast-registry");
    assert_eq!(session["interfaces"][0], "prism.registry.v1");

    runner.abort();
}

#[tokio::test]
async fn test_pattern_health_over_bridge() {
    let (addr, _state) = start_test_server().await;
    let client = reqwest::Client::new();
    setup_placement(&client, addr).await;

    let runner = spawn_runner(addr);
    wait_for_session(&client, addr, "pat-1").await;
    // Give auto-initialize a moment to bind slots and start.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let health: Value = client
        .get(api(addr, "/api/v1/patterns/pat-1/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["details"]["identities"], "0");

    runner.abort();
}

#[tokio::test]
async fn test_health_for_unconnected_pattern_rejected() {
    let (addr, _state) = start_test_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(api(addr, "/api/v1/patterns/nobody/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);
}

#[tokio::test]
async fn test_revocation_drains_and_restores_slots() {
    let (addr, state) = start_test_server().await;
    let client = reqwest::Client::new();
    setup_placement(&client, addr).await;
    assert_eq!(state.fsm.get_launcher("L1").unwrap().available_slots, 3);

    let runner = spawn_runner(addr);
    wait_for_session(&client, addr, "pat-1").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = client
        .post(api(addr, "/api/v1/patterns/pat-1/revoke"))
        .json(&json!({ "graceful_timeout_seconds": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body["revoked_at"].as_i64().unwrap() > 0);
    assert_eq!(body["aborted_operations"], 0);

    // The runner exits after the stop message.
    let result = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());

    assert_eq!(
        state.fsm.get_pattern("pat-1").unwrap().status,
        PlacementStatus::Stopped
    );
    assert_eq!(state.fsm.get_launcher("L1").unwrap().available_slots, 4);
}

#[tokio::test]
async fn test_namespace_revocation_drains_sessions() {
    let (addr, _state) = start_test_server().await;
    let client = reqwest::Client::new();
    setup_placement(&client, addr).await;

    let runner = spawn_runner(addr);
    wait_for_session(&client, addr, "pat-1").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = client
        .post(api(addr, "/api/v1/namespaces/devices/revoke"))
        .json(&json!({ "graceful_timeout_seconds": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["aborted_operations"], 0);

    runner.abort();
}
