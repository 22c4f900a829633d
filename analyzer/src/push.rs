//! Push delivery to a single live connection.
//!
//! [`PushTransport`] is the raw "send to connection" primitive with a
//! distinguished [`TransportError::Gone`]. [`Pusher`] wraps it with the rules
//! the worker relies on:
//! - no connection id: logged no-op
//! - gone: swallowed, the client navigated away
//! - anything else: returned to the caller
//!
//! Every message is stamped with the send time, not the time it was built.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::StatusCode;
use shared_types::TaskEvent;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection {0} is no longer available")]
    Gone(String),

    #[error("Transport error: {0}")]
    Other(String),
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, connection_id: &str, body: String) -> Result<(), TransportError>;
}

// ============================================================================
// In-process socket table
// ============================================================================

/// Outbound queues of the websocket connections accepted by this process.
///
/// This is the transport's own bookkeeping (the equivalent of a gateway's
/// connection table). Task-to-connection routing never reads it; that goes
/// through the persistent registry.
#[derive(Debug, Default)]
pub struct LocalConnections {
    sockets: DashMap<String, mpsc::UnboundedSender<String>>,
}

impl LocalConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: &str, outbound: mpsc::UnboundedSender<String>) {
        self.sockets.insert(connection_id.to_string(), outbound);
    }

    pub fn unregister(&self, connection_id: &str) {
        self.sockets.remove(connection_id);
    }
}

#[async_trait]
impl PushTransport for LocalConnections {
    async fn send(&self, connection_id: &str, body: String) -> Result<(), TransportError> {
        let Some(outbound) = self.sockets.get(connection_id).map(|tx| tx.clone()) else {
            return Err(TransportError::Gone(connection_id.to_string()));
        };
        if outbound.send(body).is_err() {
            self.sockets.remove(connection_id);
            return Err(TransportError::Gone(connection_id.to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Gateway management API
// ============================================================================

/// Pushes through an external websocket gateway that exposes
/// `POST {endpoint}/@connections/{connection_id}`. HTTP 410 means gone.
#[derive(Debug, Clone)]
pub struct GatewayTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl GatewayTransport {
    pub fn new(endpoint: &str) -> Result<Self, reqwest::Error> {
        // Gateways hand out wss:// URLs; the management API is plain https.
        let endpoint = endpoint
            .trim_end_matches('/')
            .replacen("wss://", "https://", 1)
            .replacen("ws://", "http://", 1);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PushTransport for GatewayTransport {
    async fn send(&self, connection_id: &str, body: String) -> Result<(), TransportError> {
        let url = format!("{}/@connections/{}", self.endpoint, connection_id);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::GONE => Err(TransportError::Gone(connection_id.to_string())),
            status => Err(TransportError::Other(format!(
                "gateway returned {status} for connection {connection_id}"
            ))),
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// No connection id; nothing was sent.
    Skipped,
    /// The transport reported the connection as gone.
    Gone,
}

#[derive(Clone)]
pub struct Pusher {
    transport: Arc<dyn PushTransport>,
}

impl Pusher {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { transport }
    }

    pub async fn push(
        &self,
        connection_id: Option<&str>,
        event: &TaskEvent,
    ) -> Result<PushOutcome, TransportError> {
        let Some(connection_id) = connection_id else {
            tracing::debug!(task_id = %event.task_id, "Skipping push - no connection for task");
            return Ok(PushOutcome::Skipped);
        };

        let mut stamped = event.clone();
        stamped.timestamp = Some(Utc::now());
        let body = serde_json::to_string(&stamped)
            .map_err(|e| TransportError::Other(format!("failed to encode event: {e}")))?;

        match self.transport.send(connection_id, body).await {
            Ok(()) => {
                tracing::debug!(
                    task_id = %event.task_id,
                    connection_id,
                    status = %event.status,
                    "Message sent to connection"
                );
                Ok(PushOutcome::Delivered)
            }
            Err(TransportError::Gone(_)) => {
                tracing::info!(
                    task_id = %event.task_id,
                    connection_id,
                    "Connection is no longer available"
                );
                Ok(PushOutcome::Gone)
            }
            Err(e) => {
                tracing::error!(
                    task_id = %event.task_id,
                    connection_id,
                    error = %e,
                    "Error sending message to connection"
                );
                Err(e)
            }
        }
    }
}
