//! rendezvous-services — the relay's moving parts: connection sessions,
//! the peer registry, the protocol engine and the overlay fallback.

pub mod connection;
pub mod lifecycle;
pub mod overlay;
pub mod registry;
pub mod relay;

#[cfg(test)]
mod testing;

pub use connection::{Connection, ConnectionId, Session, SessionState};
pub use lifecycle::ConnectionLifecycle;
pub use overlay::mesh::{MeshOptions, TcpOverlay};
pub use overlay::router::OverlayRouter;
pub use overlay::{JoinMode, LinkId, NoOverlay, Overlay, OverlayError, OverlayFrame, OverlayStatus};
pub use registry::{Binding, PeerRegistry};
pub use relay::{run_inbound, RelayEngine};
