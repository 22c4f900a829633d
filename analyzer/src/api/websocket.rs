//! Duplex channel for subscriptions and live task events.
//!
//! Each socket gets a fresh connection id. Outbound traffic (session replies
//! and worker pushes alike) goes through one queue drained by a writer task,
//! so pushes from other tasks never contend for the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use shared_types::{AckStatus, ClientMessage, SessionMessage, SubscriptionAck};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::subscription::{ack_for, subscribe};
use crate::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    state.sockets.register(&connection_id, tx.clone());
    tracing::info!(connection_id = %connection_id, "WebSocket connected");

    send_json(
        &tx,
        &SessionMessage::Connected {
            connection_id: connection_id.clone(),
        },
    );

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(reply) = handle_text(&state, &connection_id, text.as_str()).await {
                    if tx.send(reply).is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    state.sockets.unregister(&connection_id);
    writer.abort();
    tracing::info!(connection_id = %connection_id, "WebSocket disconnected");
}

/// Reply to one inbound text frame.
async fn handle_text(state: &AppState, connection_id: &str, text: &str) -> Option<String> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(connection_id, error = %e, "Unrecognized client message");
            return encode(&SubscriptionAck {
                message: "Invalid message format".to_string(),
                task_id: None,
                status: AckStatus::Error,
            });
        }
    };

    match message {
        ClientMessage::Subscribe { task_id, url } => {
            let result = subscribe(
                state.registry.as_ref(),
                connection_id,
                task_id.as_deref(),
                url.as_deref(),
            )
            .await;
            if let Err(e) = &result {
                tracing::warn!(connection_id, task_id = ?task_id, error = %e, "Subscription failed");
            }
            encode(&ack_for(task_id.as_deref(), &result))
        }
        ClientMessage::Ping => encode(&SessionMessage::Pong),
    }
}

fn send_json<T: serde::Serialize>(tx: &mpsc::UnboundedSender<String>, value: &T) {
    if let Some(text) = encode(value) {
        let _ = tx.send(text);
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode websocket message");
            None
        }
    }
}
