//! TCP overlay mesh between relay nodes.
//!
//! Every node listens for overlay links and dials its bootstrap peers. A
//! link carries newline-delimited `OverlayFrame` JSON in both directions:
//! a hello with the sender's node id, topic joins and leaves (so each side
//! learns which addresses the other announces) and data frames holding
//! relay envelopes. Inbound envelopes are handed to the relay engine
//! through an mpsc channel.
//!
//! Two nodes that dial each other end up with one link: once both hellos
//! are in, the link dialed by the node with the smaller id is kept.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use rendezvous_core::{RelayEnvelope, Topic};

use super::{JoinMode, LinkId, LinkInfo, Overlay, OverlayError, OverlayFrame, OverlayStatus};

/// Longest accepted overlay line. SDP blobs are a few KB.
const MAX_LINE_BYTES: usize = 256 * 1024;

/// Limits on lookup joins. Announce joins are bounded by the registry.
#[derive(Debug, Clone, Copy)]
pub struct MeshOptions {
    pub lookup_ttl: Duration,
    pub max_lookups: usize,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            lookup_ttl: Duration::from_secs(120),
            max_lookups: 1024,
        }
    }
}

struct LinkHandle {
    remote: SocketAddr,
    /// Bootstrap address this link was dialed for, if we dialed it.
    dialed: Option<String>,
    /// Remote node id, once its hello has arrived.
    node: Option<u64>,
    outbound: mpsc::UnboundedSender<String>,
    /// Topics the remote has announced.
    topics: HashSet<Topic>,
}

struct Joined {
    mode: JoinMode,
    since: Instant,
}

pub struct TcpOverlay {
    node_id: u64,
    local_addr: SocketAddr,
    options: MeshOptions,
    links: DashMap<LinkId, LinkHandle>,
    joined: DashMap<Topic, Joined>,
    /// Bootstrap address → node id learned from a link dialed for it.
    dialed_nodes: DashMap<String, u64>,
    next_link: AtomicU64,
    inbound: mpsc::UnboundedSender<RelayEnvelope>,
}

impl TcpOverlay {
    /// Bind the overlay listener with default limits.
    pub async fn bind(
        listen: SocketAddr,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RelayEnvelope>)> {
        Self::bind_with(listen, MeshOptions::default()).await
    }

    /// Bind the overlay listener and start accepting links.
    ///
    /// Returns the overlay and the stream of envelopes received from remote
    /// nodes.
    pub async fn bind_with(
        listen: SocketAddr,
        options: MeshOptions,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RelayEnvelope>)> {
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("failed to bind overlay listener on {listen}"))?;
        let local_addr = listener.local_addr()?;
        let (inbound, inbound_rx) = mpsc::unbounded_channel();

        let overlay = Arc::new(Self {
            node_id: rand::random(),
            local_addr,
            options,
            links: DashMap::new(),
            joined: DashMap::new(),
            dialed_nodes: DashMap::new(),
            next_link: AtomicU64::new(1),
            inbound,
        });

        tokio::spawn(accept_loop(overlay.clone(), listener));
        tracing::info!(addr = %local_addr, node = overlay.node_id, "overlay listening");

        Ok((overlay, inbound_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Dial another relay node once.
    pub async fn connect(self: &Arc<Self>, remote: &str) -> Result<LinkId> {
        let stream = TcpStream::connect(remote)
            .await
            .with_context(|| format!("failed to dial overlay peer {remote}"))?;
        Ok(self.attach(stream, Some(remote.to_string())))
    }

    /// Is there a live link to the node behind this bootstrap address,
    /// whichever side dialed it?
    pub fn has_link_to(&self, remote: &str) -> bool {
        let node = self.dialed_nodes.get(remote).map(|n| *n);
        self.links.iter().any(|l| {
            l.dialed.as_deref() == Some(remote) || (node.is_some() && l.node == node)
        })
    }

    /// Keep a link open to every bootstrap peer, re-dialing dropped ones.
    ///
    /// Runs until the task is aborted.
    pub async fn redial_loop(self: Arc<Self>, peers: Vec<String>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            for peer in &peers {
                if self.has_link_to(peer) {
                    continue;
                }
                match self.connect(peer).await {
                    Ok(link) => tracing::info!(link, peer = %peer, "dialed overlay peer"),
                    Err(e) => tracing::debug!(peer = %peer, error = %e, "overlay dial failed"),
                }
            }
        }
    }

    fn attach(self: &Arc<Self>, stream: TcpStream, dialed: Option<String>) -> LinkId {
        let id = self.next_link.fetch_add(1, Ordering::Relaxed);
        let remote = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(link = id, error = %e, "TCP_NODELAY failed");
        }
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<String>();

        if let Ok(line) = (OverlayFrame::Hello { node: self.node_id }).encode() {
            let _ = tx.send(line);
        }

        // Visible to concurrent joins before the replay below, so no
        // announcement falls between the two.
        self.links.insert(
            id,
            LinkHandle {
                remote,
                dialed,
                node: None,
                outbound: tx.clone(),
                topics: HashSet::new(),
            },
        );

        // The new remote learns every address announced here so far.
        for entry in self.joined.iter() {
            if entry.mode != JoinMode::Announce {
                continue;
            }
            if let Ok(line) = OverlayFrame::join(*entry.key(), JoinMode::Announce).encode() {
                let _ = tx.send(line);
            }
        }
        drop(tx);

        tokio::spawn(write_loop(id, write_half, rx));
        tokio::spawn(self.clone().read_loop(id, read_half));
        tracing::info!(link = id, remote = %remote, "overlay link up");
        id
    }

    async fn read_loop(self: Arc<Self>, id: LinkId, read_half: OwnedReadHalf) {
        let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => self.handle_line(id, &line),
                Err(e) => {
                    tracing::warn!(link = id, error = %e, "overlay read failed");
                    break;
                }
            }
            if !self.links.contains_key(&id) {
                break;
            }
        }
        if self.links.remove(&id).is_some() {
            tracing::info!(link = id, "overlay link down");
        }
    }

    fn handle_line(&self, id: LinkId, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match OverlayFrame::decode(line) {
            Ok(OverlayFrame::Hello { node }) => self.identify(id, node),
            Ok(OverlayFrame::Join { topic, announce }) => {
                tracing::debug!(link = id, topic = %topic, announce, "remote joined topic");
                if announce {
                    if let Some(mut link) = self.links.get_mut(&id) {
                        link.topics.insert(topic);
                    }
                }
            }
            Ok(OverlayFrame::Leave { topic }) => {
                tracing::debug!(link = id, topic = %topic, "remote left topic");
                if let Some(mut link) = self.links.get_mut(&id) {
                    link.topics.remove(&topic);
                }
            }
            Ok(OverlayFrame::Data { envelope }) => {
                if self.inbound.send(envelope).is_err() {
                    tracing::debug!(link = id, "no inbound consumer, dropping envelope");
                }
            }
            Err(e) => tracing::warn!(link = id, error = %e, "dropping malformed overlay frame"),
        }
    }

    /// Record the remote node id of a link and close it if it duplicates
    /// another link to the same node.
    fn identify(&self, id: LinkId, node: u64) {
        if node == self.node_id {
            tracing::warn!(link = id, "overlay link to self, closing");
            self.close_link(id);
            return;
        }

        let dialed = match self.links.get_mut(&id) {
            Some(mut link) => {
                link.node = Some(node);
                link.dialed.clone()
            }
            None => return,
        };
        if let Some(remote) = &dialed {
            self.dialed_nodes.insert(remote.clone(), node);
        }
        tracing::debug!(link = id, node, "overlay link identified");

        let twin = self
            .links
            .iter()
            .find(|l| *l.key() != id && l.node == Some(node))
            .map(|l| (*l.key(), l.dialed.is_some()));
        let Some((other, other_dialed)) = twin else {
            return;
        };

        // Both ends agree on the survivor: the link the smaller node dialed.
        let keep_ours = self.node_id < node;
        let loser = match (dialed.is_some(), other_dialed) {
            (true, false) | (false, true) => {
                if dialed.is_some() == keep_ours {
                    other
                } else {
                    id
                }
            }
            // Two dials to one node: the dialer closes the newer one.
            (true, true) => id.max(other),
            // Both accepted: the dialing side resolves it.
            (false, false) => return,
        };
        tracing::info!(link = loser, node, "closing duplicate overlay link");
        self.close_link(loser);
    }

    /// Forget a link. Dropping its sender ends the write loop, which
    /// closes the socket; the read loop exits on the next frame or EOF.
    fn close_link(&self, id: LinkId) {
        self.links.remove(&id);
    }

    /// Drop expired lookups, then the oldest one if still at the cap.
    fn make_room_for_lookup(&self, now: Instant) {
        let ttl = self.options.lookup_ttl;
        self.joined.retain(|_, j| {
            j.mode == JoinMode::Announce || now.saturating_duration_since(j.since) < ttl
        });

        let lookups = self.joined.iter().filter(|e| e.mode == JoinMode::Lookup).count();
        if lookups < self.options.max_lookups {
            return;
        }
        let oldest = self
            .joined
            .iter()
            .filter(|e| e.mode == JoinMode::Lookup)
            .min_by_key(|e| e.since)
            .map(|e| *e.key());
        if let Some(topic) = oldest {
            self.joined.remove_if(&topic, |_, j| j.mode == JoinMode::Lookup);
        }
    }

    fn broadcast(&self, frame: &OverlayFrame) {
        let line = match frame.encode() {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode overlay frame");
                return;
            }
        };
        for link in self.links.iter() {
            let _ = link.outbound.send(line.clone());
        }
    }
}

impl Overlay for TcpOverlay {
    fn join(&self, topic: Topic, mode: JoinMode) {
        let now = Instant::now();
        if mode == JoinMode::Lookup && !self.joined.contains_key(&topic) {
            self.make_room_for_lookup(now);
        }

        let ttl = self.options.lookup_ttl;
        // Frames go out under the entry guard so a racing leave for the same
        // topic cannot overtake the join on a link.
        match self.joined.entry(topic) {
            Entry::Occupied(mut e) => {
                let refresh = match (e.get().mode, mode) {
                    (JoinMode::Lookup, JoinMode::Announce) => true,
                    (JoinMode::Lookup, JoinMode::Lookup) => {
                        now.saturating_duration_since(e.get().since) >= ttl
                    }
                    _ => false,
                };
                if !refresh {
                    return;
                }
                e.insert(Joined { mode, since: now });
                self.broadcast(&OverlayFrame::join(topic, mode));
            }
            Entry::Vacant(e) => {
                let _guard = e.insert(Joined { mode, since: now });
                self.broadcast(&OverlayFrame::join(topic, mode));
            }
        }
        tracing::debug!(topic = %topic, mode = ?mode, "joined overlay topic");
    }

    fn leave(&self, topic: Topic) {
        if let Entry::Occupied(e) = self.joined.entry(topic) {
            if e.get().mode == JoinMode::Announce {
                self.broadcast(&OverlayFrame::Leave { topic });
            }
            e.remove();
            tracing::debug!(topic = %topic, "left overlay topic");
        }
    }

    fn links(&self) -> Vec<LinkId> {
        let mut ids: Vec<_> = self.links.iter().map(|l| *l.key()).collect();
        ids.sort_unstable();
        ids
    }

    fn members_of(&self, topic: &Topic) -> Vec<LinkId> {
        let mut ids: Vec<_> = self
            .links
            .iter()
            .filter(|l| l.topics.contains(topic))
            .map(|l| *l.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    fn send(&self, link: LinkId, frame: &str) -> Result<(), OverlayError> {
        let handle = self.links.get(&link).ok_or(OverlayError::UnknownLink(link))?;
        handle
            .outbound
            .send(frame.to_string())
            .map_err(|_| OverlayError::LinkClosed(link))
    }

    fn status(&self) -> OverlayStatus {
        let mut links: Vec<LinkInfo> = self
            .links
            .iter()
            .map(|l| {
                let mut topics: Vec<Topic> = l.topics.iter().copied().collect();
                topics.sort();
                LinkInfo {
                    id: *l.key(),
                    remote: l.remote.to_string(),
                    topics,
                }
            })
            .collect();
        links.sort_by_key(|l| l.id);
        let mut joined: Vec<Topic> = self.joined.iter().map(|e| *e.key()).collect();
        joined.sort();
        OverlayStatus { links, joined }
    }
}

/// Accept inbound overlay links.
///
/// Runs until the task is aborted.
async fn accept_loop(overlay: Arc<TcpOverlay>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                tracing::debug!(remote = %remote, "accepted overlay link");
                overlay.attach(stream, None);
            }
            Err(e) => {
                tracing::warn!(error = %e, "overlay accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn write_loop(id: LinkId, write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    let mut sink = FramedWrite::new(write_half, LinesCodec::new());
    while let Some(line) = rx.recv().await {
        if let Err(e) = sink.send(line).await {
            tracing::warn!(link = id, error = %e, "overlay write failed");
            break;
        }
    }
}
