//! Relay status, bound peers and overlay links.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    connections: usize,
    addresses: usize,
    overlay_links: usize,
    auth_mode: String,
    policy: String,
}

#[derive(Deserialize)]
struct PeersResponse {
    peers: Vec<PeerInfo>,
}

#[derive(Deserialize)]
struct PeerInfo {
    address: String,
    connections: usize,
}

#[derive(Deserialize)]
struct OverlayResponse {
    links: Vec<LinkInfo>,
    joined: Vec<String>,
}

#[derive(Deserialize)]
struct LinkInfo {
    id: u64,
    remote: String,
    topics: Vec<String>,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Rendezvous Relay Status");
    println!("═══════════════════════════════════════");
    println!("  Bound addresses  : {}", resp.addresses);
    println!("  Connections      : {}", resp.connections);
    println!("  Overlay links    : {}", resp.overlay_links);
    println!("  Auth mode        : {}", resp.auth_mode);
    println!("  Binding policy   : {}", resp.policy);

    Ok(())
}

pub async fn cmd_peers(port: u16) -> Result<()> {
    let resp: PeersResponse = get_json(&format!("{}/peers", base_url(port))).await?;

    if resp.peers.is_empty() {
        println!("No addresses bound.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Bound Addresses ({})", resp.peers.len());
    println!("═══════════════════════════════════════");
    for p in &resp.peers {
        let noun = if p.connections == 1 { "connection" } else { "connections" };
        println!("  {}  {} {}", p.address, p.connections, noun);
    }

    Ok(())
}

pub async fn cmd_overlay(port: u16) -> Result<()> {
    let resp: OverlayResponse = get_json(&format!("{}/overlay", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Overlay");
    println!("═══════════════════════════════════════");
    println!("  Joined topics : {}", resp.joined.len());

    if resp.links.is_empty() {
        println!("\n  No overlay links.");
    } else {
        println!("\n  Links:");
        for l in &resp.links {
            println!("  ┌─ link {}", l.id);
            println!("  │  remote    : {}", l.remote);
            println!("  └─ announced : {} topics", l.topics.len());
        }
    }

    Ok(())
}
