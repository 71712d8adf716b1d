//! Control-plane server for the Prism data gateway.
//!
//! Serves the proxy/launcher coordination contract over HTTP/JSON and the
//! pattern control-plane bridge over WebSocket:
//!
//! - registration and heartbeat for proxies and launchers, with a
//!   background sweep that marks silent members unhealthy and evicts dead
//!   proxies
//! - namespace lifecycle: create, list, delete, assign, revoke
//! - pattern placement: assign to launchers, revoke with graceful drain
//! - the bridge ([`bridge`]): patterns connect, declare their interfaces,
//!   and are driven through initialize / start / drain / stop / health
//!
//! All state lives in the admin FSM (`prism-admin`); every mutation is a
//! command proposed through the server's [`state::CommandLog`].

#![warn(clippy::all)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use bridge::client::PatternRunner;
pub use config::ServerConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::create_router;
pub use state::{spawn_heartbeat_sweep, AppState, CommandLog};

use prism_runtime::DriverRegistry;

/// Driver registry with the backends this build ships: `memory` and `redb`.
pub fn default_drivers() -> DriverRegistry {
    let mut drivers = DriverRegistry::new();
    drivers.register("memory", |_| Ok(prism_ext_memory::memory_driver()));
    drivers.register("redb", |config| {
        let path = config
            .get("path")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| "./data/prism.redb".to_string());
        prism_ext_redb::redb_driver(path)
    });
    drivers
}
