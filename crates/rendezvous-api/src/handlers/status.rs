//! /status, /peers, /overlay handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use rendezvous_core::{AuthMode, BindingPolicy};
use rendezvous_services::OverlayStatus;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connections: usize,
    pub addresses: usize,
    pub overlay_links: usize,
    pub auth_mode: AuthMode,
    pub policy: BindingPolicy,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        connections: state.registry.connection_count(),
        addresses: state.registry.len(),
        overlay_links: state.overlay.links().len(),
        auth_mode: state.auth_mode,
        policy: state.policy,
    })
}

// ── /peers ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Serialize)]
pub struct PeerInfo {
    pub address: String,
    pub connections: usize,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    let peers = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(address, connections)| PeerInfo {
            address: address.to_string(),
            connections,
        })
        .collect();

    Json(PeersResponse { peers })
}

// ── /overlay ──────────────────────────────────────────────────────────────────

pub async fn handle_overlay(State(state): State<ApiState>) -> Json<OverlayStatus> {
    Json(state.overlay.status())
}
