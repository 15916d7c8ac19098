//! rendezvousd — wallet-authenticated WebRTC signaling relay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use rendezvous_api::ApiState;
use rendezvous_core::RendezvousConfig;
use rendezvous_services::{
    run_inbound, ConnectionLifecycle, MeshOptions, NoOverlay, Overlay, OverlayRouter,
    PeerRegistry, RelayEngine, TcpOverlay,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = RendezvousConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    // Config errors are fatal; never fall back to defaults.
    let config = RendezvousConfig::load().context("failed to load config")?;
    tracing::info!(
        listen = %config.network.listen,
        auth = ?config.auth.mode,
        policy = ?config.registry.policy,
        overlay = config.overlay.enabled,
        "rendezvousd starting"
    );

    // Shared state
    let registry = PeerRegistry::new(config.registry.policy);

    // Overlay
    let (overlay, inbound_rx, redial_task) = if config.overlay.enabled {
        let options = MeshOptions {
            lookup_ttl: Duration::from_secs(config.overlay.lookup_ttl_secs),
            max_lookups: config.overlay.max_lookups.max(1),
        };
        let (mesh, inbound_rx) = TcpOverlay::bind_with(config.overlay.listen, options)
            .await
            .context("failed to start overlay")?;
        let redial = tokio::spawn(mesh.clone().redial_loop(
            config.overlay.bootstrap.clone(),
            Duration::from_secs(config.overlay.redial_secs.max(1)),
        ));
        (mesh as Arc<dyn Overlay>, Some(inbound_rx), Some(redial))
    } else {
        tracing::warn!("overlay disabled: signaling for unbound targets will be dropped");
        (Arc::new(NoOverlay) as Arc<dyn Overlay>, None, None)
    };

    // Relay engine
    let router = OverlayRouter::new(overlay.clone(), config.overlay.scope);
    let engine = Arc::new(RelayEngine::new(
        registry.clone(),
        router.clone(),
        config.auth.clone(),
    ));
    let lifecycle = Arc::new(ConnectionLifecycle::new(
        registry.clone(),
        router,
        config.auth.clone(),
    ));

    let _inbound_task = inbound_rx.map(|rx| tokio::spawn(run_inbound(engine.clone(), rx)));

    // Periodic summary
    let stats_printer = {
        let registry = registry.clone();
        let overlay = overlay.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                tracing::info!(
                    connections = registry.connection_count(),
                    addresses = registry.len(),
                    overlay_links = overlay.links().len(),
                    "relay stats"
                );
            }
        })
    };

    // Signaling + status server
    let server_task = {
        let state = ApiState {
            engine,
            lifecycle,
            registry,
            overlay,
            auth_mode: config.auth.mode,
            policy: config.registry.policy,
        };
        let listen = config.network.listen;
        tokio::spawn(async move {
            if let Err(e) = rendezvous_api::serve(state, listen).await {
                tracing::error!(error = %e, "signaling server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
        r = server_task             => tracing::error!("signaling server exited: {:?}", r),
        r = stats_printer           => tracing::error!("stats printer exited: {:?}", r),
    }

    if let Some(task) = redial_task {
        task.abort();
    }

    Ok(())
}
