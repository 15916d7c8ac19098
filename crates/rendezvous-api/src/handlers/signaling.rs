//! /ws — one WebSocket per client session.
//!
//! Outbound frames go through an unbounded channel drained by a writer
//! task, so the relay engine never awaits a slow socket. Inbound frames are
//! handled one at a time in arrival order.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::ApiState;

pub async fn handle_ws(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut session = state.lifecycle.open(tx);
    tracing::info!(conn = %session.id(), "client connected");

    while let Some(result) = receiver.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(conn = %session.id(), error = %e, "websocket error");
                break;
            }
        };
        state.engine.handle_frame(&mut session, text.as_str());
    }

    state.lifecycle.close(&mut session);
    writer.abort();
}
