//! API integration tests for the Prism control plane.
//!
//! These tests drive the full HTTP surface: proxy and launcher
//! registration, heartbeats, namespace lifecycle, and pattern placement
//! with capacity enforcement.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;

use prism_admin::partition_for;
use prism_server::{create_router, AppState, ServerConfig};
use prism_traits::driver::HealthState;

/// Start a test server on a random port and return its address and state.
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

async fn register_proxy(client: &reqwest::Client, addr: SocketAddr, proxy_id: &str, version: &str) -> Value {
    client
        .post(api(addr, "/api/v1/proxies/register"))
        .json(&json!({
            "proxy_id": proxy_id,
            "address": "a:1",
            "region": "us-west",
            "version": version,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

fn namespace_body(name: &str) -> Value {
    json!({
        "config": {
            "name": name,
            "pattern": "multicast-registry",
            "slots": {
                "registry": { "backend": "memory" },
                "messaging": { "backend": "memory" },
            },
        },
        "principal": "alice",
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _state) = start_test_server().await;
    let body: Value = reqwest::get(api(addr, "/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["last_applied_index"], 0);
}

#[tokio::test]
async fn test_namespace_creation_routes_to_partition_owner() {
    let (addr, _state) = start_test_server().await;
    let client = reqwest::Client::new();

    let registration = register_proxy(&client, addr, "P1", "1.0").await;
    assert_eq!(registration["partition_ranges"][0]["start"], 0);
    assert_eq!(registration["partition_ranges"][0]["end"], 255);

    let response = client
        .post(api(addr, "/api/v1/namespaces"))
        .json(&namespace_body("orders"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "orders");
    assert_eq!(body["assigned_partition"], partition_for("orders"));
    assert_eq!(body["assigned_proxy"], "P1");

    let fetched: Value = client
        .get(api(addr, "/api/v1/namespaces/orders"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["partition_id"], partition_for("orders"));
    assert_eq!(fetched["created_by"], "alice");
}

#[tokio::test]
async fn test_proxy_reregistration_is_idempotent() {
    let (addr, state) = start_test_server().await;
    let client = reqwest::Client::new();

    register_proxy(&client, addr, "P1", "1.0").await;
    let second = register_proxy(&client, addr, "P1", "1.1").await;
    assert_eq!(second["partition_ranges"][0]["end"], 255);

    let proxy = state.fsm.get_proxy("P1").unwrap();
    assert_eq!(proxy.version, "1.1");
    assert_eq!(proxy.status, HealthState::Healthy);
    state.fsm.with_state(|s| assert_eq!(s.proxies.len(), 1));
}

#[tokio::test]
async fn test_launcher_capacity_enforcement() {
    let (addr, _state) = start_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(api(addr, "/api/v1/launchers/register"))
        .json(&json!({
            "launcher_id": "L1",
            "address": "l:1",
            "max_processes": 2,
        }))
        .send()
        .await
        .unwrap();
    client
        .post(api(addr, "/api/v1/namespaces"))
        .json(&namespace_body("devices"))
        .send()
        .await
        .unwrap();

    for pattern_id in ["pat-1", "pat-2"] {
        let response = client
            .post(api(addr, "/api/v1/patterns/assign"))
            .json(&json!({
                "pattern_id": pattern_id,
                "pattern_type": "multicast-registry",
                "launcher_id": "L1",
                "namespace": "devices",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "{} should be placed", pattern_id);
    }

    let response = client
        .post(api(addr, "/api/v1/patterns/assign"))
        .json(&json!({
            "pattern_id": "pat-3",
            "pattern_type": "multicast-registry",
            "launcher_id": "L1",
            "namespace": "devices",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "precondition_failed");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_heartbeats() {
    let (addr, state) = start_test_server().await;
    let client = reqwest::Client::new();

    // Unknown proxy rejects with failed_precondition.
    let response = client
        .post(api(addr, "/api/v1/proxies/heartbeat"))
        .json(&json!({"proxy_id": "ghost"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);

    register_proxy(&client, addr, "P1", "1.0").await;
    let response = client
        .post(api(addr, "/api/v1/proxies/heartbeat"))
        .json(&json!({"proxy_id": "P1", "status": "degraded"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body["server_timestamp"].as_i64().unwrap() > 0);
    assert_eq!(state.fsm.get_proxy("P1").unwrap().status, HealthState::Degraded);
}

#[tokio::test]
async fn test_delete_namespace() {
    let (addr, _state) = start_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(api(addr, "/api/v1/namespaces"))
        .json(&namespace_body("orders"))
        .send()
        .await
        .unwrap();

    let response = client
        .delete(api(addr, "/api/v1/namespaces/orders"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = client
        .get(api(addr, "/api/v1/namespaces/orders"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_registration_returns_existing_namespaces() {
    let (addr, _state) = start_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(api(addr, "/api/v1/namespaces"))
        .json(&namespace_body("orders"))
        .send()
        .await
        .unwrap();

    let registration = register_proxy(&client, addr, "P1", "1.0").await;
    let initial = registration["initial_namespaces"].as_array().unwrap();
    assert_eq!(initial.len(), 1);
    assert_eq!(initial[0]["name"], "orders");
    assert_eq!(initial[0]["partition_id"], partition_for("orders"));
}

#[tokio::test]
async fn test_launcher_heartbeat_updates_slots() {
    let (addr, state) = start_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(api(addr, "/api/v1/launchers/register"))
        .json(&json!({
            "launcher_id": "L1",
            "address": "l:1",
            "max_processes": 8,
        }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(api(addr, "/api/v1/launchers/heartbeat"))
        .json(&json!({
            "launcher_id": "L1",
            "available_slots": 5,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(state.fsm.get_launcher("L1").unwrap().available_slots, 5);
}
