//! Relay protocol engine — interprets client frames and routes signaling.
//!
//! One call to `handle_frame` runs to completion before the session's next
//! frame is read, so frames from one client are handled in arrival order.
//! Nothing here fails the session: every problem either becomes an `error`
//! frame to the sender or a log line.

use std::sync::Arc;

use tokio::sync::mpsc;

use rendezvous_core::config::AuthConfig;
use rendezvous_core::identity;
use rendezvous_core::{
    AuthMode, ClientFrame, MessageKind, PeerAddress, ProtocolError, RelayEnvelope, ServerMessage,
};

use crate::connection::Session;
use crate::lifecycle::withdraw_if_unbound;
use crate::overlay::router::OverlayRouter;
use crate::registry::PeerRegistry;

pub struct RelayEngine {
    registry: PeerRegistry,
    router: OverlayRouter,
    auth: AuthConfig,
}

impl RelayEngine {
    pub fn new(registry: PeerRegistry, router: OverlayRouter, auth: AuthConfig) -> Self {
        Self {
            registry,
            router,
            auth,
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn router(&self) -> &OverlayRouter {
        &self.router
    }

    /// Handle one text frame from a client session.
    pub fn handle_frame(&self, session: &mut Session, text: &str) {
        if session.is_closed() {
            tracing::trace!(conn = %session.id(), "frame on closed session ignored");
            return;
        }

        let frame = match ClientFrame::parse(text) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(conn = %session.id(), error = %e, "dropping malformed frame");
                return;
            }
        };

        let Some(kind) = frame.kind() else {
            tracing::debug!(conn = %session.id(), kind = frame.type_name(), "ignoring unknown message type");
            return;
        };

        let result = match kind {
            MessageKind::Login => self.handle_login(session, &frame),
            MessageKind::Call => self.handle_call(session, &frame),
            _ => self.handle_relay(session, kind, &frame),
        };

        if let Err(e) = result {
            tracing::debug!(conn = %session.id(), kind = kind.as_str(), error = %e, "request rejected");
            session.connection().send_message(&e.into());
        }
    }

    fn handle_login(&self, session: &mut Session, frame: &ClientFrame) -> Result<(), ProtocolError> {
        let (Some(raw_address), Some(signature)) =
            (frame.str_field("address"), frame.str_field("signature"))
        else {
            return Err(ProtocolError::MissingCredentials);
        };
        let claimed =
            PeerAddress::parse(raw_address).map_err(|_| ProtocolError::MissingCredentials)?;

        if !identity::verify(session.challenge(), &claimed, signature) {
            tracing::warn!(conn = %session.id(), address = %claimed, "login signature rejected");
            return Err(ProtocolError::InvalidSignature);
        }

        let binding = self.registry.bind(&claimed, session.connection());
        if let Some(previous) = &binding.moved_from {
            tracing::info!(conn = %session.id(), from = %previous, to = %claimed, "connection rebound");
            withdraw_if_unbound(&self.registry, &self.router, previous);
        }
        for evicted in &binding.evicted {
            tracing::info!(conn = %evicted, address = %claimed, "binding evicted by newer login");
        }

        self.router.announce(&claimed);
        session.authenticate(claimed.clone());
        tracing::info!(conn = %session.id(), address = %claimed, "logged in");

        let conn = session.connection().clone();
        conn.send_message(&ServerMessage::LoginSuccess { address: claimed });

        if self.auth.mode == AuthMode::Nonce {
            let next = identity::nonce_challenge(&self.auth.challenge);
            session.rotate_challenge(next.clone());
            conn.send_message(&ServerMessage::Challenge { challenge: next });
        }
        Ok(())
    }

    fn handle_call(&self, session: &mut Session, frame: &ClientFrame) -> Result<(), ProtocolError> {
        let from = session.address().cloned().ok_or(ProtocolError::NotLoggedIn)?;
        let target = frame.target().ok_or(ProtocolError::MissingTarget)?;

        let peers = self.registry.lookup(&target);
        if peers.is_empty() {
            tracing::debug!(conn = %session.id(), to = %target, "call target not local, looking up on overlay");
            self.router.discover(&target);
        } else {
            let peers: Vec<_> = peers.into_iter().filter(|p| p.id() != session.id()).collect();
            let ring = ServerMessage::IncomingCall { from: from.clone() };
            for peer in &peers {
                if !peer.send_message(&ring) {
                    tracing::warn!(conn = %peer.id(), to = %target, "incoming-call write failed");
                }
            }
            tracing::debug!(from = %from, to = %target, devices = peers.len(), "call delivered");
        }

        session
            .connection()
            .send_message(&ServerMessage::CallAck { target });
        Ok(())
    }

    fn handle_relay(
        &self,
        session: &mut Session,
        kind: MessageKind,
        frame: &ClientFrame,
    ) -> Result<(), ProtocolError> {
        let from = session.address().cloned().ok_or(ProtocolError::NotLoggedIn)?;
        let target = frame.target().ok_or(ProtocolError::MissingTarget)?;
        if let Some(field) = kind.required_field() {
            if !frame.has_field(field) {
                return Err(ProtocolError::MissingField(field));
            }
        }

        let envelope = RelayEnvelope::build(kind, &from, frame.fields(), &target);
        let peers = self.registry.lookup(&target);
        if peers.is_empty() {
            self.router.forward(&envelope, &target);
            return Ok(());
        }
        let peers: Vec<_> = peers.into_iter().filter(|p| p.id() != session.id()).collect();
        if peers.is_empty() {
            // Target is bound here, only to the sender itself.
            tracing::debug!(conn = %session.id(), kind = kind.as_str(), "self-addressed signaling dropped");
            return Ok(());
        }

        let json = envelope.to_json();
        for peer in &peers {
            if !peer.send(json.clone()) {
                tracing::warn!(conn = %peer.id(), kind = kind.as_str(), "relay write failed");
            }
        }
        tracing::debug!(kind = kind.as_str(), from = %from, to = %target, devices = peers.len(), "relayed");
        Ok(())
    }

    /// Deliver an envelope that arrived over the overlay. Only targets bound
    /// here receive it; nothing is re-broadcast. Returns the number of local
    /// connections written.
    pub fn deliver_remote(&self, envelope: &RelayEnvelope) -> usize {
        let kind = envelope.type_name().and_then(MessageKind::from_type);
        if !kind.is_some_and(|k| k.is_relayed()) {
            tracing::warn!(
                kind = envelope.type_name().unwrap_or("?"),
                "overlay envelope with non-relay type dropped"
            );
            return 0;
        }
        let Some(target) = envelope.target() else {
            tracing::warn!("overlay envelope without target dropped");
            return 0;
        };
        let peers = self.registry.lookup(&target);
        if peers.is_empty() {
            tracing::trace!(to = %target, "overlay envelope for unbound target dropped");
            return 0;
        }

        let json = envelope.to_json();
        let delivered = peers.iter().filter(|p| p.send(json.clone())).count();
        tracing::debug!(
            to = %target,
            kind = envelope.type_name().unwrap_or("?"),
            delivered,
            "delivered overlay envelope"
        );
        delivered
    }
}

/// Feed envelopes received from the overlay into the engine.
///
/// Returns when the overlay drops its sender.
pub async fn run_inbound(engine: Arc<RelayEngine>, mut inbound: mpsc::UnboundedReceiver<RelayEnvelope>) {
    while let Some(envelope) = inbound.recv().await {
        engine.deliver_remote(&envelope);
    }
    tracing::debug!("overlay inbound channel closed");
}
