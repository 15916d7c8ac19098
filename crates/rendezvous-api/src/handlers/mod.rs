//! HTTP handlers — the signaling socket and relay state as JSON.

pub mod signaling;
pub mod status;

use std::sync::Arc;

use rendezvous_core::{AuthMode, BindingPolicy};
use rendezvous_services::{ConnectionLifecycle, Overlay, PeerRegistry, RelayEngine};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<RelayEngine>,
    pub lifecycle: Arc<ConnectionLifecycle>,
    pub registry: PeerRegistry,
    pub overlay: Arc<dyn Overlay>,
    pub auth_mode: AuthMode,
    pub policy: BindingPolicy,
}

// Re-export handler functions for use in router setup.
pub use signaling::handle_ws;
pub use status::{handle_overlay, handle_peers, handle_status};
