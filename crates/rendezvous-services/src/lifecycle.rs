//! Connection lifecycle — session creation and teardown.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use rendezvous_core::config::AuthConfig;
use rendezvous_core::identity;
use rendezvous_core::{AuthMode, PeerAddress, ServerMessage};

use crate::connection::{Connection, ConnectionId, Session};
use crate::overlay::router::OverlayRouter;
use crate::registry::PeerRegistry;

pub struct ConnectionLifecycle {
    registry: PeerRegistry,
    router: OverlayRouter,
    auth: AuthConfig,
    next_id: AtomicU64,
}

/// Withdraw the overlay announcement for `address` once nothing here is
/// bound to it. A login racing the withdraw re-announces.
pub(crate) fn withdraw_if_unbound(registry: &PeerRegistry, router: &OverlayRouter, address: &PeerAddress) {
    if registry.contains(address) {
        return;
    }
    router.withdraw(address);
    if registry.contains(address) {
        router.announce(address);
    }
}

impl ConnectionLifecycle {
    pub fn new(registry: PeerRegistry, router: OverlayRouter, auth: AuthConfig) -> Self {
        Self {
            registry,
            router,
            auth,
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a session for a freshly accepted transport. In nonce mode the
    /// session's challenge is sent before anything else.
    pub fn open(&self, outbound: mpsc::UnboundedSender<String>) -> Session {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Connection::new(id, outbound);

        let challenge = match self.auth.mode {
            AuthMode::Fixed => self.auth.challenge.clone(),
            AuthMode::Nonce => {
                let challenge = identity::nonce_challenge(&self.auth.challenge);
                connection.send_message(&ServerMessage::Challenge {
                    challenge: challenge.clone(),
                });
                challenge
            }
        };

        tracing::debug!(conn = %id, "session opened");
        Session::new(connection, challenge)
    }

    /// Tear a session down: drop its binding, withdraw the address from the
    /// overlay if this was its last connection, and mark it closed. Safe to
    /// call more than once.
    pub fn close(&self, session: &mut Session) {
        if session.is_closed() {
            return;
        }
        match self.registry.unbind(session.id()) {
            Some(address) => {
                tracing::info!(conn = %session.id(), address = %address, "disconnected");
                withdraw_if_unbound(&self.registry, &self.router, &address);
            }
            None => tracing::debug!(conn = %session.id(), "unauthenticated session closed"),
        }
        session.close();
    }
}
