//! Overlay — the decentralized fallback path between relay nodes.
//!
//! When a target address is not bound on this relay, signaling is handed to
//! the overlay: the node joins the topic derived from the address and writes
//! the envelope to its overlay links, trusting another relay that holds the
//! target to deliver it.
//!
//! The `Overlay` trait is the capability the relay needs from whatever
//! overlay network is underneath. `mesh::TcpOverlay` is the implementation
//! the daemon runs; tests use in-memory implementations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rendezvous_core::{RelayEnvelope, Topic};

pub mod mesh;
pub mod router;

/// Identifies one overlay link on this node.
pub type LinkId = u64;

/// Why a topic is joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    /// An address is bound here.
    Announce,
    /// Discovery lookup for an address that is not bound here.
    Lookup,
}

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("unknown overlay link {0}")]
    UnknownLink(LinkId),
    #[error("overlay link {0} is closed")]
    LinkClosed(LinkId),
    #[error("overlay I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("overlay frame encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Snapshot of one link for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct LinkInfo {
    pub id: LinkId,
    pub remote: String,
    /// Topics the remote has announced.
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OverlayStatus {
    pub links: Vec<LinkInfo>,
    pub joined: Vec<Topic>,
}

/// What the relay needs from an overlay network.
pub trait Overlay: Send + Sync {
    /// Join a topic. Repeated joins are cheap no-ops.
    fn join(&self, topic: Topic, mode: JoinMode);

    /// Stop holding a topic. Remotes forget an announcement once it is left.
    fn leave(&self, topic: Topic);

    /// Every currently open link.
    fn links(&self) -> Vec<LinkId>;

    /// Links whose remote announced this topic.
    fn members_of(&self, topic: &Topic) -> Vec<LinkId>;

    /// Write one encoded frame to a link.
    fn send(&self, link: LinkId, frame: &str) -> Result<(), OverlayError>;

    fn status(&self) -> OverlayStatus;
}

/// Overlay used when the fallback path is switched off: joins nothing and
/// has no links, so undeliverable signaling is dropped.
#[derive(Debug, Default)]
pub struct NoOverlay;

impl Overlay for NoOverlay {
    fn join(&self, _topic: Topic, _mode: JoinMode) {}

    fn leave(&self, _topic: Topic) {}

    fn links(&self) -> Vec<LinkId> {
        Vec::new()
    }

    fn members_of(&self, _topic: &Topic) -> Vec<LinkId> {
        Vec::new()
    }

    fn send(&self, link: LinkId, _frame: &str) -> Result<(), OverlayError> {
        Err(OverlayError::UnknownLink(link))
    }

    fn status(&self) -> OverlayStatus {
        OverlayStatus::default()
    }
}

// ── Link frames ───────────────────────────────────────────────────────────────

/// One line on an overlay link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum OverlayFrame {
    /// First frame on every link: the sender's node id.
    Hello { node: u64 },
    Join { topic: Topic, announce: bool },
    Leave { topic: Topic },
    Data { envelope: RelayEnvelope },
}

impl OverlayFrame {
    pub fn join(topic: Topic, mode: JoinMode) -> Self {
        Self::Join {
            topic,
            announce: mode == JoinMode::Announce,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
