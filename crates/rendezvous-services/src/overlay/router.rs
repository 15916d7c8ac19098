//! Overlay fallback router — delivery for targets not bound locally.

use std::sync::Arc;

use rendezvous_core::{BroadcastScope, PeerAddress, RelayEnvelope};

use super::{JoinMode, Overlay, OverlayFrame};

#[derive(Clone)]
pub struct OverlayRouter {
    overlay: Arc<dyn Overlay>,
    scope: BroadcastScope,
}

impl OverlayRouter {
    pub fn new(overlay: Arc<dyn Overlay>, scope: BroadcastScope) -> Self {
        Self { overlay, scope }
    }

    pub fn overlay(&self) -> &Arc<dyn Overlay> {
        &self.overlay
    }

    /// Announce that `address` is reachable through this node.
    pub fn announce(&self, address: &PeerAddress) {
        self.overlay.join(address.topic(), JoinMode::Announce);
    }

    /// Withdraw the announcement for an address no longer bound here.
    pub fn withdraw(&self, address: &PeerAddress) {
        self.overlay.leave(address.topic());
    }

    /// Best-effort discovery lookup for an address not bound here.
    pub fn discover(&self, address: &PeerAddress) {
        self.overlay.join(address.topic(), JoinMode::Lookup);
    }

    /// Look up `target` and write the envelope to the overlay links
    /// selected by the broadcast scope. A failed write is logged and the
    /// remaining links still get the frame. Returns how many writes
    /// succeeded.
    pub fn forward(&self, envelope: &RelayEnvelope, target: &PeerAddress) -> usize {
        let topic = target.topic();
        self.discover(target);

        let frame = match (OverlayFrame::Data {
            envelope: envelope.clone(),
        })
        .encode()
        {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(to = %target, error = %e, "failed to encode overlay frame");
                return 0;
            }
        };

        let links = match self.scope {
            BroadcastScope::All => self.overlay.links(),
            BroadcastScope::Topic => self.overlay.members_of(&topic),
        };

        let mut delivered = 0;
        for link in &links {
            match self.overlay.send(*link, &frame) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(link, to = %target, error = %e, "overlay write failed"),
            }
        }

        let topic_hex = topic.to_hex();
        tracing::debug!(
            to = %target,
            topic = &topic_hex[..16],
            links = links.len(),
            delivered,
            "forwarded envelope to overlay"
        );
        delivered
    }
}
