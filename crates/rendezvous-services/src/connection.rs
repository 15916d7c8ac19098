//! Client connections and their per-session state.

use std::fmt;

use tokio::sync::mpsc;

use rendezvous_core::{PeerAddress, ServerMessage};

/// Unique per transport session. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Handle to a client's outbound frame queue. Cheap to clone; the registry
/// holds one per binding.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a text frame. Returns false once the transport has gone away.
    pub fn send(&self, frame: String) -> bool {
        self.outbound.send(frame).is_ok()
    }

    pub fn send_message(&self, message: &ServerMessage) -> bool {
        self.send(message.to_json())
    }

    /// The writer side has hung up.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Unauthenticated → Authenticated → Closed. No way back from Closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(PeerAddress),
    Closed,
}

/// Everything the relay knows about one client session. Owned by the task
/// driving that session; only the `Connection` handle is shared.
#[derive(Debug)]
pub struct Session {
    connection: Connection,
    state: SessionState,
    /// Text the next login signature must cover.
    challenge: String,
}

impl Session {
    pub fn new(connection: Connection, challenge: String) -> Self {
        Self {
            connection,
            state: SessionState::Unauthenticated,
            challenge,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn address(&self) -> Option<&PeerAddress> {
        match &self.state {
            SessionState::Authenticated(address) => Some(address),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub(crate) fn authenticate(&mut self, address: PeerAddress) {
        if !self.is_closed() {
            self.state = SessionState::Authenticated(address);
        }
    }

    pub(crate) fn rotate_challenge(&mut self, challenge: String) {
        self.challenge = challenge;
    }

    pub(crate) fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}
