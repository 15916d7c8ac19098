//! Peer registry — which local connections are bound to which address.
//!
//! Single source of truth for "is this peer reachable on this relay".
//! Keys are normalized `PeerAddress` values, so lookups are
//! case-insensitive by construction. Each operation holds the DashMap shard
//! lock for its address for its whole duration; a lookup never observes a
//! half-updated connection set.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use rendezvous_core::{BindingPolicy, PeerAddress};

use crate::connection::{Connection, ConnectionId};

/// Outcome of a `bind`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Binding {
    /// Connections displaced under the single-binding policy.
    pub evicted: Vec<ConnectionId>,
    /// Address this connection was bound to before, if it changed.
    pub moved_from: Option<PeerAddress>,
}

/// Shared between the relay engine, the lifecycle
/// manager and the status API. Clones share state.
#[derive(Clone)]
pub struct PeerRegistry {
    peers: Arc<DashMap<PeerAddress, BTreeMap<ConnectionId, Connection>>>,
    /// Reverse index: connection → the one address it is bound to.
    bound: Arc<DashMap<ConnectionId, PeerAddress>>,
    policy: BindingPolicy,
}

impl PeerRegistry {
    pub fn new(policy: BindingPolicy) -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            bound: Arc::new(DashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> BindingPolicy {
        self.policy
    }

    /// Bind a connection to an address.
    ///
    /// A connection already bound elsewhere is moved. Closed connections
    /// found under the address are pruned. Under `Single`, every other
    /// connection for the address is evicted from the map; their transports
    /// are left alone.
    pub fn bind(&self, address: &PeerAddress, connection: &Connection) -> Binding {
        let id = connection.id();
        let previous = self.bound.get(&id).map(|a| a.value().clone());
        let moved_from = match previous {
            Some(prev) if prev != *address => {
                self.remove_from(&prev, id);
                Some(prev)
            }
            _ => None,
        };

        let mut evicted = Vec::new();
        let mut pruned = Vec::new();
        {
            let mut set = self.peers.entry(address.clone()).or_default();
            set.retain(|other, conn| {
                if *other == id {
                    return true;
                }
                if conn.is_closed() {
                    pruned.push(*other);
                    return false;
                }
                if self.policy == BindingPolicy::Single {
                    evicted.push(*other);
                    return false;
                }
                true
            });
            set.insert(id, connection.clone());

            // Reverse index changes under the address guard. Lock order is
            // always peers then bound.
            for other in evicted.iter().chain(pruned.iter()) {
                self.bound.remove_if(other, |_, a| a == address);
            }
            self.bound.insert(id, address.clone());
        }

        Binding { evicted, moved_from }
    }

    /// Live connections bound to an address, in connection order.
    pub fn lookup(&self, address: &PeerAddress) -> Vec<Connection> {
        self.peers
            .get(address)
            .map(|set| {
                set.values()
                    .filter(|c| !c.is_closed())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove a connection from whichever address holds it. Drops the
    /// address entry once its last connection is gone.
    pub fn unbind(&self, id: ConnectionId) -> Option<PeerAddress> {
        let (_, address) = self.bound.remove(&id)?;
        self.remove_from(&address, id);
        Some(address)
    }

    fn remove_from(&self, address: &PeerAddress, id: ConnectionId) {
        if let Entry::Occupied(mut entry) = self.peers.entry(address.clone()) {
            entry.get_mut().remove(&id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    pub fn address_of(&self, id: ConnectionId) -> Option<PeerAddress> {
        self.bound.get(&id).map(|a| a.value().clone())
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.peers.contains_key(address)
    }

    /// Number of bound addresses.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Number of bound connections across all addresses.
    pub fn connection_count(&self) -> usize {
        self.bound.len()
    }

    /// Every bound address, sorted.
    pub fn addresses(&self) -> Vec<PeerAddress> {
        let mut out: Vec<_> = self.peers.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }

    /// (address, connection count), sorted by address.
    pub fn snapshot(&self) -> Vec<(PeerAddress, usize)> {
        let mut out: Vec<_> = self
            .peers
            .iter()
            .map(|e| (e.key().clone(), e.value().len()))
            .collect();
        out.sort();
        out
    }
}
