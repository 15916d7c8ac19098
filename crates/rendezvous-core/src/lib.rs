//! rendezvous-core — addresses, protocol messages, identity verification
//! and configuration. All other rendezvous crates depend on this one.

pub mod address;
pub mod config;
pub mod identity;
pub mod message;

pub use address::{AddressError, PeerAddress, Topic};
pub use config::{AuthMode, BindingPolicy, BroadcastScope, RendezvousConfig};
pub use message::{ClientFrame, MessageKind, ProtocolError, RelayEnvelope, ServerMessage};
