//! Rendezvous integration test harness.
//!
//! Every test starts its own relays in-process on 127.0.0.1 with
//! OS-assigned ports and talks to them over real WebSocket and TCP
//! sockets, so tests never interfere with each other.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use rendezvous_api::ApiState;
use rendezvous_core::config::{AuthConfig, DEFAULT_CHALLENGE};
use rendezvous_core::identity::LocalSigner;
use rendezvous_core::{AuthMode, BindingPolicy, BroadcastScope};
use rendezvous_services::{
    run_inbound, ConnectionLifecycle, NoOverlay, Overlay, OverlayRouter, PeerRegistry,
    RelayEngine, TcpOverlay,
};

mod signaling;
mod status;

/// How long a test waits for an expected frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

// ── Relay harness ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub struct RelayOptions {
    pub auth_mode: AuthMode,
    pub policy: BindingPolicy,
    pub overlay: bool,
    pub scope: BroadcastScope,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            auth_mode: AuthMode::Fixed,
            policy: BindingPolicy::Multi,
            overlay: false,
            scope: BroadcastScope::All,
        }
    }
}

/// One relay running inside the test process. Its tasks stop when dropped.
pub struct Relay {
    pub addr: SocketAddr,
    pub registry: PeerRegistry,
    pub mesh: Option<Arc<TcpOverlay>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Relay {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Relay {
    pub async fn start(opts: RelayOptions) -> Result<Self> {
        let registry = PeerRegistry::new(opts.policy);
        let mut tasks = Vec::new();

        let (overlay, mesh, inbound) = if opts.overlay {
            let (mesh, inbound) = TcpOverlay::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
            (mesh.clone() as Arc<dyn Overlay>, Some(mesh), Some(inbound))
        } else {
            (Arc::new(NoOverlay) as Arc<dyn Overlay>, None, None)
        };

        let auth = AuthConfig {
            mode: opts.auth_mode,
            challenge: DEFAULT_CHALLENGE.to_string(),
        };
        let router = OverlayRouter::new(overlay.clone(), opts.scope);
        let engine = Arc::new(RelayEngine::new(registry.clone(), router.clone(), auth.clone()));
        let lifecycle = Arc::new(ConnectionLifecycle::new(registry.clone(), router, auth));

        if let Some(rx) = inbound {
            tasks.push(tokio::spawn(run_inbound(engine.clone(), rx)));
        }

        let state = ApiState {
            engine,
            lifecycle,
            registry: registry.clone(),
            overlay,
            auth_mode: opts.auth_mode,
            policy: opts.policy,
        };
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tasks.push(tokio::spawn(async move {
            if let Err(e) = rendezvous_api::serve_on(listener, state).await {
                eprintln!("relay server failed: {e}");
            }
        }));

        Ok(Self {
            addr,
            registry,
            mesh,
            tasks,
        })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("http://{}/api{}", self.addr, path)
    }

    pub fn mesh(&self) -> Result<&Arc<TcpOverlay>> {
        self.mesh.as_ref().context("relay started without overlay")
    }

    /// Dial `other`'s overlay listener and wait until both ends see the link.
    pub async fn link_to(&self, other: &Relay) -> Result<()> {
        let ours = self.mesh()?;
        let theirs = other.mesh()?;
        let before = theirs.links().len();
        ours.connect(&theirs.local_addr().to_string()).await?;
        wait_until(|| theirs.links().len() > before).await
    }
}

/// Poll `cond` until it holds or `RECV_TIMEOUT` runs out.
pub async fn wait_until<F: Fn() -> bool>(cond: F) -> Result<()> {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            bail!("condition not reached within {:?}", RECV_TIMEOUT);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

pub async fn api_get(relay: &Relay, path: &str) -> Result<Value> {
    reqwest::get(relay.api_url(path))
        .await
        .with_context(|| format!("GET {path} failed"))?
        .json::<Value>()
        .await
        .context("response was not JSON")
}

// ── WebSocket client ──────────────────────────────────────────────────────────

pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub async fn connect(relay: &Relay) -> Result<Self> {
        let (ws, _) = connect_async(relay.ws_url())
            .await
            .with_context(|| format!("failed to connect to {}", relay.ws_url()))?;
        Ok(Self { ws })
    }

    pub async fn send(&mut self, frame: Value) -> Result<()> {
        self.ws.send(Message::Text(frame.to_string().into())).await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.ws.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    /// Next JSON text frame.
    pub async fn recv(&mut self) -> Result<Value> {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .context("timed out waiting for a frame")?
                .context("socket closed")??;
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).context("frame was not JSON");
            }
        }
    }

    /// Assert nothing arrives for a short while.
    pub async fn expect_silence(&mut self) -> Result<()> {
        match tokio::time::timeout(Duration::from_millis(300), self.ws.next()).await {
            Err(_) => Ok(()),
            Ok(Some(Ok(Message::Text(text)))) => bail!("unexpected frame: {}", text.as_str()),
            Ok(other) => bail!("unexpected socket event: {other:?}"),
        }
    }

    /// Log in over the fixed challenge and return the login-success frame.
    pub async fn login(&mut self, signer: &LocalSigner) -> Result<Value> {
        self.login_over(signer, DEFAULT_CHALLENGE).await
    }

    pub async fn login_over(&mut self, signer: &LocalSigner, challenge: &str) -> Result<Value> {
        let signature = signer.sign(challenge)?;
        self.send(json!({
            "type": "login",
            "address": signer.address().as_str(),
            "signature": signature,
        }))
        .await?;
        let reply = self.recv().await?;
        if reply["type"] != "login-success" {
            bail!("login failed: {reply}");
        }
        Ok(reply)
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

pub fn signer(seed: u8) -> LocalSigner {
    LocalSigner::from_bytes(&[seed; 32]).expect("valid test key")
}
