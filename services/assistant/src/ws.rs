//! WebSocket push channel for the storefront UI.
//!
//! A connected UI first receives the current session state, then every state
//! change and every UI command the assistant issues. It may send typed user
//! messages over the same socket.

use crate::{
    realtime::{SessionController, SessionSnapshot},
    state::AppState,
};
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use shopper_core::UiCommand;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, instrument, warn};

/// Messages sent from the UI to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    UserMessage { text: String },
}

/// Messages pushed from the server to the UI.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status { session: SessionSnapshot },
    Ui { command: UiCommand },
    Error { message: String },
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

#[instrument(name = "ui_socket", skip_all)]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("UI client attached.");
    if let Err(e) = run_socket(socket, state).await {
        debug!(error = ?e, "UI socket ended with error.");
    }
    info!("UI client detached.");
}

async fn run_socket(socket: WebSocket, state: Arc<AppState>) -> Result<()> {
    let (mut socket_tx, mut socket_rx) = socket.split();
    let mut status = state.controller.watch();
    let mut commands = state.ui.subscribe();

    let current = status.borrow_and_update().clone();
    send_msg(&mut socket_tx, ServerMessage::Status { session: current }).await?;

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = status.borrow_and_update().clone();
                send_msg(&mut socket_tx, ServerMessage::Status { session }).await?;
            }
            command = commands.recv() => match command {
                Ok(command) => send_msg(&mut socket_tx, ServerMessage::Ui { command }).await?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "UI client fell behind; commands dropped."),
                Err(RecvError::Closed) => break,
            },
            incoming = socket_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_client_message(&state.controller, &text).await {
                        send_msg(&mut socket_tx, reply).await?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = ?e, "Error receiving from UI socket.");
                    break;
                }
            },
        }
    }
    Ok(())
}

/// Applies one inbound message and returns the reply to push, if any.
async fn handle_client_message(controller: &SessionController, text: &str) -> Option<ServerMessage> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            return Some(ServerMessage::Error {
                message: format!("Unrecognized message: {e}"),
            });
        }
    };
    match message {
        ClientMessage::UserMessage { text } => controller
            .send_text(text)
            .await
            .err()
            .map(|e| ServerMessage::Error {
                message: e.to_string(),
            }),
    }
}

/// Serializes and sends one [`ServerMessage`].
async fn send_msg(socket_tx: &mut SplitSink<WebSocket, Message>, msg: ServerMessage) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
