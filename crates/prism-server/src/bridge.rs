//! Pattern control-plane bridge.
//!
//! Each pattern executable opens a WebSocket to its owning proxy and speaks
//! a JSON message protocol: a `hello` handshake declaring the interfaces it
//! implements, then `initialize` / `start` / `drain` / `stop` /
//! `health_check` requests from the proxy with matching `*_result`
//! responses from the pattern.
//!
//! The server side keeps a session registry keyed by pattern id; revocation
//! pushes `drain` through it and collects the drain summary before
//! reporting `revoked_at`. The [`client`] module is the pattern-side
//! counterpart used by launcher-hosted executables and tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use prism_traits::config::NamespaceConfig;
use prism_traits::driver::HealthState;
use prism_traits::error::ErrorKind;

use crate::error::ApiError;
use crate::state::{unix_now, AppState};

/// Deadline for handshake and unary bridge requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// Messages sent by the pattern executable to the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeClientMessage {
    /// Handshake: identity and interface declarations.
    Hello {
        /// Pattern placement id.
        pattern_id: String,
        /// Namespace this pattern serves.
        namespace: String,
        /// Pattern type name.
        name: String,
        /// Executable version.
        version: String,
        /// Interface names the pattern serves.
        interfaces: Vec<String>,
    },
    /// Response to `initialize`.
    InitializeResult {
        /// Whether slot binding succeeded.
        success: bool,
        /// Bind error, when unsuccessful.
        error: Option<String>,
        /// Pattern-reported metadata.
        metadata: BTreeMap<String, String>,
    },
    /// Response to `start`.
    StartResult {
        /// Whether startup succeeded.
        success: bool,
        /// Startup error, when unsuccessful.
        error: Option<String>,
    },
    /// Response to `drain`.
    DrainResult {
        /// Operations completed during the drain window.
        drained_operations: u64,
        /// Operations aborted at the deadline.
        aborted_operations: u64,
    },
    /// Response to `stop`.
    StopResult {
        /// Whether teardown succeeded.
        success: bool,
        /// Teardown error, when unsuccessful.
        error: Option<String>,
    },
    /// Response to `health_check`.
    HealthResult {
        /// Aggregated health state.
        status: HealthState,
        /// Optional degradation message.
        message: Option<String>,
        /// Diagnostic details.
        details: BTreeMap<String, String>,
    },
}

/// Messages sent by the proxy to the pattern executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeServerMessage {
    /// Handshake acknowledgement.
    Welcome {
        /// Assigned session id.
        session_id: String,
        /// Server time (unix seconds).
        server_time: i64,
    },
    /// Bind slots from the namespace configuration.
    Initialize {
        /// Namespace configuration with slot bindings and behavior.
        config: NamespaceConfig,
    },
    /// Begin serving operations.
    Start,
    /// Refuse new operations and finish in-flight ones.
    Drain {
        /// Drain window in seconds.
        timeout_seconds: u64,
        /// Reason, for the pattern's logs.
        reason: String,
    },
    /// Tear down drivers and exit.
    Stop {
        /// Teardown deadline in seconds.
        timeout_seconds: u64,
    },
    /// Report health.
    HealthCheck,
}

// =============================================================================
// SESSION REGISTRY
// =============================================================================

struct BridgeRequest {
    message: BridgeServerMessage,
    reply: oneshot::Sender<BridgeClientMessage>,
}

/// A connected pattern session.
pub struct SessionHandle {
    /// Assigned session id.
    pub session_id: String,
    /// Pattern placement id.
    pub pattern_id: String,
    /// Namespace the pattern serves.
    pub namespace: String,
    /// Pattern type name.
    pub name: String,
    /// Executable version.
    pub version: String,
    /// Declared interfaces, used for dispatch.
    pub interfaces: Vec<String>,
    requests: mpsc::Sender<BridgeRequest>,
}

impl SessionHandle {
    /// Send a request and wait for the pattern's response.
    pub async fn request(
        &self,
        message: BridgeServerMessage,
        timeout: Duration,
    ) -> Result<BridgeClientMessage, ApiError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(BridgeRequest {
                message,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ApiError::internal("bridge session closed"))?;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ApiError::internal("bridge session closed")),
            Err(_) => Err(ApiError::new(ErrorKind::Timeout, "pattern did not respond")),
        }
    }

    /// Drain the pattern, returning `(drained, aborted)`.
    ///
    /// A session that dies or exceeds the grace period counts its work as
    /// aborted.
    pub async fn drain(&self, timeout_seconds: u64, reason: &str) -> (u64, u64) {
        let window = Duration::from_secs(timeout_seconds) + REQUEST_TIMEOUT;
        match self
            .request(
                BridgeServerMessage::Drain {
                    timeout_seconds,
                    reason: reason.to_string(),
                },
                window,
            )
            .await
        {
            Ok(BridgeClientMessage::DrainResult {
                drained_operations,
                aborted_operations,
            }) => (drained_operations, aborted_operations),
            Ok(other) => {
                warn!(pattern_id = %self.pattern_id, response = ?other, "Unexpected drain response");
                (0, 1)
            }
            Err(e) => {
                warn!(pattern_id = %self.pattern_id, error = %e.message, "Drain request failed");
                (0, 1)
            }
        }
    }
}

/// Registry of connected pattern sessions, keyed by pattern id.
#[derive(Default)]
pub struct BridgeSessions {
    sessions: DashMap<String, Arc<SessionHandle>>,
}

impl BridgeSessions {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for a pattern id.
    pub fn get(&self, pattern_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(pattern_id).map(|s| s.clone())
    }

    /// Sessions serving a namespace.
    pub fn for_namespace(&self, namespace: &str) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().namespace == namespace)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// All connected sessions.
    pub fn list(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    fn insert(&self, session: Arc<SessionHandle>) {
        self.sessions.insert(session.pattern_id.clone(), session);
    }

    fn remove(&self, pattern_id: &str, session_id: &str) {
        self.sessions
            .remove_if(pattern_id, |_, s| s.session_id == session_id);
    }
}

// =============================================================================
// SERVER SIDE
// =============================================================================

/// Upgrade handler for `/api/v1/patterns/bridge`.
pub async fn bridge_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

async fn handle_session(mut socket: WebSocket, state: Arc<AppState>) {
    let hello = match read_message(&mut socket).await {
        Some(BridgeClientMessage::Hello {
            pattern_id,
            namespace,
            name,
            version,
            interfaces,
        }) => (pattern_id, namespace, name, version, interfaces),
        other => {
            warn!(message = ?other, "Bridge connection without hello");
            return;
        }
    };
    let (pattern_id, namespace, name, version, interfaces) = hello;
    let session_id = uuid::Uuid::new_v4().to_string();

    if send_message(
        &mut socket,
        &BridgeServerMessage::Welcome {
            session_id: session_id.clone(),
            server_time: unix_now(),
        },
    )
    .await
    .is_err()
    {
        return;
    }

    let (req_tx, mut req_rx) = mpsc::channel::<BridgeRequest>(16);
    let session = Arc::new(SessionHandle {
        session_id: session_id.clone(),
        pattern_id: pattern_id.clone(),
        namespace: namespace.clone(),
        name: name.clone(),
        version,
        interfaces,
        requests: req_tx,
    });
    state.sessions.insert(session.clone());
    info!(pattern_id = %pattern_id, namespace = %namespace, session_id = %session_id, "Pattern connected");

    spawn_auto_initialize(state.clone(), session.clone());

    // Responses answer requests in FIFO order.
    let mut pending: VecDeque<oneshot::Sender<BridgeClientMessage>> = VecDeque::new();
    loop {
        tokio::select! {
            request = req_rx.recv() => {
                let Some(BridgeRequest { message, reply }) = request else { break };
                match send_message(&mut socket, &message).await {
                    Ok(()) => pending.push_back(reply),
                    Err(()) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<BridgeClientMessage>(text.as_str()) {
                            Ok(response) => match pending.pop_front() {
                                Some(reply) => { let _ = reply.send(response); }
                                None => warn!(pattern_id = %pattern_id, "Unsolicited bridge response"),
                            },
                            Err(e) => warn!(pattern_id = %pattern_id, error = %e, "Undecodable bridge message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(pattern_id = %pattern_id, error = %e, "Bridge socket error");
                        break;
                    }
                }
            }
        }
    }

    state.sessions.remove(&pattern_id, &session_id);
    info!(pattern_id = %pattern_id, session_id = %session_id, "Pattern disconnected");
}

/// Initialize and start the pattern once its namespace config is known.
fn spawn_auto_initialize(state: Arc<AppState>, session: Arc<SessionHandle>) {
    let Some(namespace) = state.fsm.get_namespace(&session.namespace) else {
        warn!(
            pattern_id = %session.pattern_id,
            namespace = %session.namespace,
            "No namespace config; waiting for explicit control"
        );
        return;
    };

    tokio::spawn(async move {
        let init = session
            .request(
                BridgeServerMessage::Initialize {
                    config: namespace.config,
                },
                REQUEST_TIMEOUT,
            )
            .await;
        match init {
            Ok(BridgeClientMessage::InitializeResult { success: true, .. }) => {
                match session.request(BridgeServerMessage::Start, REQUEST_TIMEOUT).await {
                    Ok(BridgeClientMessage::StartResult { success: true, .. }) => {
                        info!(pattern_id = %session.pattern_id, "Pattern initialized and started");
                    }
                    other => {
                        warn!(pattern_id = %session.pattern_id, response = ?other, "Pattern start failed")
                    }
                }
            }
            other => {
                warn!(pattern_id = %session.pattern_id, response = ?other, "Pattern initialize failed")
            }
        }
    });
}

async fn read_message(socket: &mut WebSocket) -> Option<BridgeClientMessage> {
    loop {
        match socket.recv().await? {
            Ok(Message::Text(text)) => {
                return serde_json::from_str(text.as_str()).ok();
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn send_message(socket: &mut WebSocket, message: &BridgeServerMessage) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|_| ())?;
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

// =============================================================================
// CLIENT SIDE
// =============================================================================

/// Pattern-side bridge client.
///
/// Connects to the proxy, performs the handshake, and drives a pattern
/// instance through the lifecycle the proxy requests. Used by
/// launcher-hosted pattern executables and by tests.
pub mod client {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tracing::{info, warn};

    use prism_runtime::{instantiate_pattern, DriverRegistry, Pattern};

    use super::{BridgeClientMessage, BridgeServerMessage};

    /// A pattern executable's connection to its proxy.
    pub struct PatternRunner {
        /// Bridge URL (`ws://host:port/api/v1/patterns/bridge`).
        pub url: String,
        /// Pattern placement id.
        pub pattern_id: String,
        /// Namespace this executable serves.
        pub namespace: String,
        /// Pattern type this executable can run.
        pub pattern_type: String,
        /// Interfaces declared in the handshake.
        pub interfaces: Vec<String>,
        /// Driver factories available for slot binding.
        pub drivers: DriverRegistry,
    }

    impl PatternRunner {
        /// Connect, handshake, and serve bridge requests until `stop` or
        /// disconnect.
        pub async fn run(self) -> anyhow::Result<()> {
            let (mut ws, _) = connect_async(&self.url).await?;

            let hello = BridgeClientMessage::Hello {
                pattern_id: self.pattern_id.clone(),
                namespace: self.namespace.clone(),
                name: self.pattern_type.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                interfaces: self.interfaces.clone(),
            };
            ws.send(WsMessage::Text(serde_json::to_string(&hello)?)).await?;

            let mut pattern: Option<Arc<dyn Pattern>> = None;
            while let Some(message) = ws.next().await {
                let message = message?;
                let WsMessage::Text(text) = message else { continue };
                let request: BridgeServerMessage = match serde_json::from_str(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(error = %e, "Undecodable bridge request");
                        continue;
                    }
                };

                let response = match request {
                    BridgeServerMessage::Welcome { session_id, .. } => {
                        info!(session_id = %session_id, "Bridge session established");
                        continue;
                    }
                    BridgeServerMessage::Initialize { config } => {
                        match instantiate_pattern(&config, &self.drivers).await {
                            Ok(instance) => {
                                let mut metadata = std::collections::BTreeMap::new();
                                metadata
                                    .insert("name".to_string(), instance.name().to_string());
                                metadata.insert(
                                    "version".to_string(),
                                    instance.version().to_string(),
                                );
                                pattern = Some(instance);
                                BridgeClientMessage::InitializeResult {
                                    success: true,
                                    error: None,
                                    metadata,
                                }
                            }
                            Err(e) => BridgeClientMessage::InitializeResult {
                                success: false,
                                error: Some(e.to_string()),
                                metadata: Default::default(),
                            },
                        }
                    }
                    BridgeServerMessage::Start => match &pattern {
                        Some(instance) => match instance.start().await {
                            Ok(()) => BridgeClientMessage::StartResult {
                                success: true,
                                error: None,
                            },
                            Err(e) => BridgeClientMessage::StartResult {
                                success: false,
                                error: Some(e.to_string()),
                            },
                        },
                        None => BridgeClientMessage::StartResult {
                            success: false,
                            error: Some("not initialized".to_string()),
                        },
                    },
                    BridgeServerMessage::Drain {
                        timeout_seconds,
                        reason,
                    } => match &pattern {
                        Some(instance) => {
                            let summary = instance
                                .drain(Duration::from_secs(timeout_seconds), &reason)
                                .await;
                            BridgeClientMessage::DrainResult {
                                drained_operations: summary.drained,
                                aborted_operations: summary.aborted,
                            }
                        }
                        None => BridgeClientMessage::DrainResult {
                            drained_operations: 0,
                            aborted_operations: 0,
                        },
                    },
                    BridgeServerMessage::Stop { .. } => {
                        let result = match pattern.take() {
                            Some(instance) => instance.stop().await,
                            None => Ok(()),
                        };
                        let response = match result {
                            Ok(()) => BridgeClientMessage::StopResult {
                                success: true,
                                error: None,
                            },
                            Err(e) => BridgeClientMessage::StopResult {
                                success: false,
                                error: Some(e.to_string()),
                            },
                        };
                        ws.send(WsMessage::Text(serde_json::to_string(&response)?))
                            .await?;
                        ws.close(None).await.ok();
                        return Ok(());
                    }
                    BridgeServerMessage::HealthCheck => match &pattern {
                        Some(instance) => {
                            let health = instance.health().await;
                            BridgeClientMessage::HealthResult {
                                status: health.state,
                                message: health.message,
                                details: health.details,
                            }
                        }
                        None => BridgeClientMessage::HealthResult {
                            status: prism_traits::HealthState::Unhealthy,
                            message: Some("not initialized".to_string()),
                            details: Default::default(),
                        },
                    },
                };

                ws.send(WsMessage::Text(serde_json::to_string(&response)?))
                    .await?;
            }

            // Disconnected without an explicit stop; release drivers.
            if let Some(instance) = pattern {
                let _ = instance.stop().await;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shapes() {
        let hello = BridgeClientMessage::Hello {
            pattern_id: "pat-1".into(),
            namespace: "devices".into(),
            name: "multicast-registry".into(),
            version: "0.3.0".into(),
            interfaces: vec!["prism.registry.v1".into()],
        };
        let json = serde_json::to_value(&hello).unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["interfaces"][0], "prism.registry.v1");

        let drain = BridgeServerMessage::Drain {
            timeout_seconds: 30,
            reason: "revoked".into(),
        };
        let json = serde_json::to_value(&drain).unwrap();
        assert_eq!(json["type"], "drain");
        assert_eq!(json["timeout_seconds"], 30);

        let back: BridgeServerMessage = serde_json::from_value(json).unwrap();
        assert!(matches!(back, BridgeServerMessage::Drain { .. }));
    }
}
