//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the WebSocket base URL of one ComfyUI
//! server. Call [`ComfyUIClient::connect`] to open the live channel for
//! a [`Session`].

use std::time::Duration;

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::session::Session;

/// Upper bound on the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The raw WebSocket stream for reading/writing frames.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI live channel.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
}

impl ComfyUIClient {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Full subscription URL for `session`.
    pub fn session_url(&self, session: &Session) -> String {
        format!("{}/ws?clientId={}", self.ws_url, session.client_id())
    }

    /// Connect to the ComfyUI WebSocket endpoint as `session`.
    ///
    /// ComfyUI addresses `executed` events to the client id given here,
    /// which must match the one used when the prompt was submitted.
    pub async fn connect(&self, session: &Session) -> Result<WsStream, ConnectError> {
        let url = self.session_url(session);

        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| ConnectError::Timeout(CONNECT_TIMEOUT))?
            .map_err(|e| {
                ConnectError::Handshake(format!(
                    "Failed to connect to ComfyUI at {}: {e}",
                    self.ws_url
                ))
            })?;

        tracing::info!(
            client_id = %session.client_id(),
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ws_stream)
    }
}

/// Errors that can occur when opening the live channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The WebSocket handshake failed.
    #[error("Connection error: {0}")]
    Handshake(String),

    /// The handshake did not finish in time.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
}
