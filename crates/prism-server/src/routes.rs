//! Route definitions.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::bridge;
use crate::handlers;
use crate::state::AppState;

/// Create the control-plane router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/api/v1/health", get(handlers::health))
        // Proxies
        .route("/api/v1/proxies/register", post(handlers::register_proxy))
        .route("/api/v1/proxies/heartbeat", post(handlers::proxy_heartbeat))
        // Namespaces
        .route(
            "/api/v1/namespaces",
            get(handlers::list_namespaces).post(handlers::create_namespace),
        )
        .route("/api/v1/namespaces/assign", post(handlers::assign_namespace))
        .route(
            "/api/v1/namespaces/{name}",
            get(handlers::get_namespace).delete(handlers::delete_namespace),
        )
        .route(
            "/api/v1/namespaces/{name}/revoke",
            post(handlers::revoke_namespace),
        )
        // Launchers
        .route(
            "/api/v1/launchers/register",
            post(handlers::register_launcher),
        )
        .route(
            "/api/v1/launchers/heartbeat",
            post(handlers::launcher_heartbeat),
        )
        // Pattern placement
        .route("/api/v1/patterns/assign", post(handlers::assign_pattern))
        .route(
            "/api/v1/patterns/{pattern_id}/revoke",
            post(handlers::revoke_pattern),
        )
        .route(
            "/api/v1/patterns/{pattern_id}/health",
            get(handlers::pattern_health),
        )
        // Pattern bridge
        .route("/api/v1/patterns/sessions", get(handlers::list_sessions))
        .route("/api/v1/patterns/bridge", get(bridge::bridge_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
