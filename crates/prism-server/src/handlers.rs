//! Control-plane request handlers.
//!
//! One handler per RPC in the proxy/launcher contract: registration,
//! heartbeat, namespace lifecycle, and pattern assignment/revocation.
//! Endpoints addressing an unknown proxy, launcher, or pattern reject with
//! `precondition_failed`; heartbeats never fail the caller on transient FSM
//! errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use prism_admin::{partition_for, CommandPayload, NamespaceEntry, PartitionRange};
use prism_traits::config::NamespaceConfig;
use prism_traits::driver::HealthState;

use crate::bridge::{BridgeClientMessage, BridgeServerMessage};
use crate::error::ApiError;
use crate::state::{unix_now, AppState};

// =============================================================================
// HEALTH
// =============================================================================

/// Admin service health.
#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    state_version: u64,
    last_applied_index: u64,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (last_applied_index, _) = state.fsm.last_applied();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        state_version: state.fsm.version(),
        last_applied_index,
    })
}

// =============================================================================
// PROXIES
// =============================================================================

/// Proxy registration request.
#[derive(Debug, Deserialize)]
pub struct RegisterProxyRequest {
    /// Unique proxy id.
    pub proxy_id: String,
    /// Reachable address.
    pub address: String,
    /// Deployment region.
    #[serde(default)]
    pub region: String,
    /// Software version.
    #[serde(default)]
    pub version: String,
    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A namespace pushed to a proxy at registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct NamespaceAssignment {
    /// Namespace name.
    pub name: String,
    /// Its partition.
    pub partition_id: i32,
    /// Full configuration.
    pub config: NamespaceConfig,
}

/// Proxy registration response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterProxyResponse {
    /// Echoed proxy id.
    pub proxy_id: String,
    /// Partition ranges now owned by the proxy.
    pub partition_ranges: Vec<PartitionRange>,
    /// Namespaces whose partitions fall in those ranges.
    pub initial_namespaces: Vec<NamespaceAssignment>,
}

/// `POST /api/v1/proxies/register`
pub async fn register_proxy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterProxyRequest>,
) -> Result<Json<RegisterProxyResponse>, ApiError> {
    if request.proxy_id.is_empty() {
        return Err(ApiError::validation("proxy_id must not be empty"));
    }
    state.log.propose(
        CommandPayload::RegisterProxy {
            proxy_id: request.proxy_id.clone(),
            address: request.address,
            region: request.region,
            version: request.version,
            capabilities: request.capabilities,
            metadata: request.metadata,
        },
        &request.proxy_id,
    )?;

    let proxy = state
        .fsm
        .get_proxy(&request.proxy_id)
        .ok_or_else(|| ApiError::internal("proxy missing after registration"))?;
    let initial_namespaces = state.fsm.with_state(|s| {
        s.namespaces_in_ranges(&proxy.partition_ranges)
            .into_iter()
            .map(|ns| NamespaceAssignment {
                name: ns.name.clone(),
                partition_id: ns.partition_id,
                config: ns.config.clone(),
            })
            .collect()
    });

    info!(proxy_id = %request.proxy_id, ranges = proxy.partition_ranges.len(), "Proxy registered");
    Ok(Json(RegisterProxyResponse {
        proxy_id: proxy.proxy_id,
        partition_ranges: proxy.partition_ranges,
        initial_namespaces,
    }))
}

/// Proxy heartbeat request.
#[derive(Debug, Deserialize)]
pub struct ProxyHeartbeatRequest {
    /// Proxy id.
    pub proxy_id: String,
    /// Self-reported status.
    #[serde(default)]
    pub status: Option<HealthState>,
    /// Per-namespace health, recorded in logs only.
    #[serde(default)]
    pub namespace_health: BTreeMap<String, HealthState>,
    /// Resource usage, recorded in logs only.
    #[serde(default)]
    pub resources: BTreeMap<String, f64>,
}

/// Heartbeat acknowledgement.
#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Server time (unix seconds).
    pub server_timestamp: i64,
}

/// `POST /api/v1/proxies/heartbeat`
pub async fn proxy_heartbeat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProxyHeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    if state.fsm.get_proxy(&request.proxy_id).is_none() {
        return Err(ApiError::failed_precondition(format!(
            "unknown proxy: {}",
            request.proxy_id
        )));
    }
    // Best-effort: a transient FSM failure must not fail the heartbeat.
    if let Err(e) = state.log.propose(
        CommandPayload::UpdateProxyStatus {
            proxy_id: request.proxy_id.clone(),
            status: request.status.unwrap_or(HealthState::Healthy),
            last_seen: unix_now(),
        },
        &request.proxy_id,
    ) {
        warn!(proxy_id = %request.proxy_id, error = %e, "Heartbeat update failed");
    }
    Ok(Json(HeartbeatResponse {
        server_timestamp: unix_now(),
    }))
}

// =============================================================================
// NAMESPACES
// =============================================================================

/// Namespace creation request.
#[derive(Debug, Deserialize)]
pub struct CreateNamespaceRequest {
    /// Full namespace configuration; the name comes from `config.name`.
    pub config: NamespaceConfig,
    /// Principal recorded as creator.
    pub principal: String,
    /// Proxy relaying the request, when client-initiated.
    #[serde(default)]
    pub requesting_proxy: Option<String>,
}

/// Namespace creation response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateNamespaceResponse {
    /// Namespace name.
    pub name: String,
    /// Partition derived from the name.
    pub assigned_partition: i32,
    /// Proxy owning that partition, when one does.
    pub assigned_proxy: Option<String>,
}

/// `POST /api/v1/namespaces`
pub async fn create_namespace(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateNamespaceRequest>,
) -> Result<Json<CreateNamespaceResponse>, ApiError> {
    let name = request.config.name.clone();
    if name.is_empty() {
        return Err(ApiError::validation("namespace name must not be empty"));
    }
    let partition = partition_for(&name);
    state.log.propose(
        CommandPayload::CreateNamespace {
            name: name.clone(),
            partition_id: Some(partition),
            assigned_proxy: None,
            config: request.config,
            principal: request.principal,
        },
        request.requesting_proxy.as_deref().unwrap_or("admin"),
    )?;

    let namespace = state
        .fsm
        .get_namespace(&name)
        .ok_or_else(|| ApiError::internal("namespace missing after creation"))?;
    info!(namespace = %name, partition = partition, "Namespace created");
    Ok(Json(CreateNamespaceResponse {
        name: namespace.name,
        assigned_partition: namespace.partition_id,
        assigned_proxy: namespace.assigned_proxy,
    }))
}

/// `GET /api/v1/namespaces`
pub async fn list_namespaces(State(state): State<Arc<AppState>>) -> Json<Vec<NamespaceEntry>> {
    Json(state.fsm.with_state(|s| s.namespaces.values().cloned().collect()))
}

/// `GET /api/v1/namespaces/{name}`
pub async fn get_namespace(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<NamespaceEntry>, ApiError> {
    state
        .fsm
        .get_namespace(&name)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown namespace: {}", name)))
}

/// `DELETE /api/v1/namespaces/{name}`
pub async fn delete_namespace(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.fsm.get_namespace(&name).is_none() {
        return Err(ApiError::not_found(format!("unknown namespace: {}", name)));
    }
    state
        .log
        .propose(CommandPayload::DeleteNamespace { name: name.clone() }, "admin")?;
    info!(namespace = %name, "Namespace deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Namespace-to-proxy assignment push.
#[derive(Debug, Deserialize)]
pub struct AssignNamespaceRequest {
    /// Target proxy.
    pub proxy_id: String,
    /// Namespace to assign.
    pub namespace: String,
}

/// `POST /api/v1/namespaces/assign`
pub async fn assign_namespace(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AssignNamespaceRequest>,
) -> Result<Json<CreateNamespaceResponse>, ApiError> {
    if state.fsm.get_proxy(&request.proxy_id).is_none() {
        return Err(ApiError::failed_precondition(format!(
            "unknown proxy: {}",
            request.proxy_id
        )));
    }
    let namespace = state.fsm.get_namespace(&request.namespace).ok_or_else(|| {
        ApiError::failed_precondition(format!("unknown namespace: {}", request.namespace))
    })?;

    state.log.propose(
        CommandPayload::CreateNamespace {
            name: namespace.name.clone(),
            partition_id: Some(namespace.partition_id),
            assigned_proxy: Some(request.proxy_id.clone()),
            config: namespace.config,
            principal: namespace.created_by,
        },
        "admin",
    )?;
    Ok(Json(CreateNamespaceResponse {
        name: request.namespace,
        assigned_partition: namespace.partition_id,
        assigned_proxy: Some(request.proxy_id),
    }))
}

/// Revocation request with a grace period.
#[derive(Debug, Deserialize, Default)]
pub struct RevokeRequest {
    /// Drain window in seconds; the server default applies when absent.
    #[serde(default)]
    pub graceful_timeout_seconds: Option<u64>,
}

/// Revocation outcome.
#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeResponse {
    /// When the revocation completed (unix seconds).
    pub revoked_at: i64,
    /// Operations drained across affected patterns.
    pub drained_operations: u64,
    /// Operations aborted at the grace deadline.
    pub aborted_operations: u64,
}

/// `POST /api/v1/namespaces/{name}/revoke`
pub async fn revoke_namespace(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, ApiError> {
    if state.fsm.get_namespace(&name).is_none() {
        return Err(ApiError::not_found(format!("unknown namespace: {}", name)));
    }
    let timeout = request
        .graceful_timeout_seconds
        .unwrap_or(state.config.drain_timeout_seconds);

    let mut drained = 0;
    let mut aborted = 0;
    for session in state.sessions.for_namespace(&name) {
        let (d, a) = session.drain(timeout, "namespace revoked").await;
        drained += d;
        aborted += a;
    }

    info!(namespace = %name, drained, aborted, "Namespace revoked");
    Ok(Json(RevokeResponse {
        revoked_at: unix_now(),
        drained_operations: drained,
        aborted_operations: aborted,
    }))
}

// =============================================================================
// LAUNCHERS
// =============================================================================

/// Launcher registration request.
#[derive(Debug, Deserialize)]
pub struct RegisterLauncherRequest {
    /// Unique launcher id.
    pub launcher_id: String,
    /// Reachable address.
    pub address: String,
    /// Deployment region.
    #[serde(default)]
    pub region: String,
    /// Software version.
    #[serde(default)]
    pub version: String,
    /// Pattern types this launcher can host.
    #[serde(default)]
    pub process_types: Vec<String>,
    /// Maximum concurrent pattern processes.
    pub max_processes: u32,
}

/// Launcher registration response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterLauncherResponse {
    /// Echoed launcher id.
    pub launcher_id: String,
    /// Maximum concurrent processes.
    pub max_processes: u32,
    /// Currently free slots.
    pub available_slots: u32,
}

/// `POST /api/v1/launchers/register`
pub async fn register_launcher(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterLauncherRequest>,
) -> Result<Json<RegisterLauncherResponse>, ApiError> {
    if request.launcher_id.is_empty() {
        return Err(ApiError::validation("launcher_id must not be empty"));
    }
    state.log.propose(
        CommandPayload::RegisterLauncher {
            launcher_id: request.launcher_id.clone(),
            address: request.address,
            region: request.region,
            version: request.version,
            process_types: request.process_types,
            max_processes: request.max_processes,
        },
        &request.launcher_id,
    )?;

    let launcher = state
        .fsm
        .get_launcher(&request.launcher_id)
        .ok_or_else(|| ApiError::internal("launcher missing after registration"))?;
    info!(launcher_id = %launcher.launcher_id, slots = launcher.available_slots, "Launcher registered");
    Ok(Json(RegisterLauncherResponse {
        launcher_id: launcher.launcher_id,
        max_processes: launcher.max_processes,
        available_slots: launcher.available_slots,
    }))
}

/// Launcher heartbeat request.
#[derive(Debug, Deserialize)]
pub struct LauncherHeartbeatRequest {
    /// Launcher id.
    pub launcher_id: String,
    /// Self-reported status.
    #[serde(default)]
    pub status: Option<HealthState>,
    /// Self-reported free slots.
    #[serde(default)]
    pub available_slots: Option<u32>,
}

/// `POST /api/v1/launchers/heartbeat`
pub async fn launcher_heartbeat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LauncherHeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    if state.fsm.get_launcher(&request.launcher_id).is_none() {
        return Err(ApiError::failed_precondition(format!(
            "unknown launcher: {}",
            request.launcher_id
        )));
    }
    if let Err(e) = state.log.propose(
        CommandPayload::UpdateLauncherStatus {
            launcher_id: request.launcher_id.clone(),
            status: request.status.unwrap_or(HealthState::Healthy),
            last_seen: unix_now(),
            available_slots: request.available_slots,
        },
        &request.launcher_id,
    ) {
        warn!(launcher_id = %request.launcher_id, error = %e, "Heartbeat update failed");
    }
    Ok(Json(HeartbeatResponse {
        server_timestamp: unix_now(),
    }))
}

// =============================================================================
// PATTERN PLACEMENT
// =============================================================================

/// Pattern assignment request.
#[derive(Debug, Deserialize)]
pub struct AssignPatternRequest {
    /// Pattern instance id.
    pub pattern_id: String,
    /// Pattern type.
    pub pattern_type: String,
    /// Hosting launcher.
    pub launcher_id: String,
    /// Namespace the pattern serves.
    pub namespace: String,
    /// Configuration override; the namespace's config applies when absent.
    #[serde(default)]
    pub config: Option<NamespaceConfig>,
}

/// `POST /api/v1/patterns/assign`
pub async fn assign_pattern(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AssignPatternRequest>,
) -> Result<Json<prism_admin::PatternPlacement>, ApiError> {
    if state.fsm.get_launcher(&request.launcher_id).is_none() {
        return Err(ApiError::failed_precondition(format!(
            "unknown launcher: {}",
            request.launcher_id
        )));
    }
    let namespace = state.fsm.get_namespace(&request.namespace).ok_or_else(|| {
        ApiError::failed_precondition(format!("unknown namespace: {}", request.namespace))
    })?;

    state.log.propose(
        CommandPayload::AssignPattern {
            pattern_id: request.pattern_id.clone(),
            pattern_type: request.pattern_type,
            launcher_id: request.launcher_id,
            namespace: request.namespace,
            config: request.config.unwrap_or(namespace.config),
        },
        "admin",
    )?;

    let placement = state
        .fsm
        .get_pattern(&request.pattern_id)
        .ok_or_else(|| ApiError::internal("placement missing after assignment"))?;
    info!(pattern_id = %placement.pattern_id, launcher_id = %placement.launcher_id, "Pattern assigned");
    Ok(Json(placement))
}

/// `POST /api/v1/patterns/{pattern_id}/revoke`
pub async fn revoke_pattern(
    State(state): State<Arc<AppState>>,
    Path(pattern_id): Path<String>,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, ApiError> {
    if state.fsm.get_pattern(&pattern_id).is_none() {
        return Err(ApiError::failed_precondition(format!(
            "unknown pattern: {}",
            pattern_id
        )));
    }
    let timeout = request
        .graceful_timeout_seconds
        .unwrap_or(state.config.drain_timeout_seconds);

    state
        .log
        .propose(CommandPayload::RevokePattern { pattern_id: pattern_id.clone() }, "admin")?;

    // Drain, then stop, through the bridge when the pattern is connected.
    let (drained, aborted) = match state.sessions.get(&pattern_id) {
        Some(session) => {
            let counts = session.drain(timeout, "pattern revoked").await;
            let _ = session
                .request(
                    BridgeServerMessage::Stop {
                        timeout_seconds: timeout,
                    },
                    std::time::Duration::from_secs(timeout.max(1)),
                )
                .await;
            counts
        }
        None => (0, 0),
    };

    state.log.propose(
        CommandPayload::ReportPatternStopped { pattern_id: pattern_id.clone() },
        "admin",
    )?;

    info!(pattern_id = %pattern_id, drained, aborted, "Pattern revoked");
    Ok(Json(RevokeResponse {
        revoked_at: unix_now(),
        drained_operations: drained,
        aborted_operations: aborted,
    }))
}

// =============================================================================
// BRIDGE SESSIONS
// =============================================================================

/// Connected pattern session summary.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id.
    pub session_id: String,
    /// Pattern placement id.
    pub pattern_id: String,
    /// Namespace served.
    pub namespace: String,
    /// Pattern type name.
    pub name: String,
    /// Executable version.
    pub version: String,
    /// Declared interfaces.
    pub interfaces: Vec<String>,
}

/// `GET /api/v1/patterns/sessions`
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    let mut sessions: Vec<SessionInfo> = state
        .sessions
        .list()
        .into_iter()
        .map(|s| SessionInfo {
            session_id: s.session_id.clone(),
            pattern_id: s.pattern_id.clone(),
            namespace: s.namespace.clone(),
            name: s.name.clone(),
            version: s.version.clone(),
            interfaces: s.interfaces.clone(),
        })
        .collect();
    sessions.sort_by(|a, b| a.pattern_id.cmp(&b.pattern_id));
    Json(sessions)
}

/// Health reported by a connected pattern.
#[derive(Debug, Serialize, Deserialize)]
pub struct PatternHealthResponse {
    /// Aggregated state.
    pub status: HealthState,
    /// Optional degradation message.
    pub message: Option<String>,
    /// Diagnostic details.
    pub details: BTreeMap<String, String>,
}

/// `GET /api/v1/patterns/{pattern_id}/health`
pub async fn pattern_health(
    State(state): State<Arc<AppState>>,
    Path(pattern_id): Path<String>,
) -> Result<Json<PatternHealthResponse>, ApiError> {
    let session = state.sessions.get(&pattern_id).ok_or_else(|| {
        ApiError::failed_precondition(format!("pattern not connected: {}", pattern_id))
    })?;
    match session
        .request(
            BridgeServerMessage::HealthCheck,
            std::time::Duration::from_secs(10),
        )
        .await?
    {
        BridgeClientMessage::HealthResult {
            status,
            message,
            details,
        } => Ok(Json(PatternHealthResponse {
            status,
            message,
            details,
        })),
        other => Err(ApiError::internal(format!(
            "unexpected health response: {:?}",
            other
        ))),
    }
}
