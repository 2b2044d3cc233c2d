//! Progress channel setup.
//!
//! ComfyUI routes execution frames by the `clientId` a socket connected
//! with, so each watch session opens its own [`ComfyUIConnection`].

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Plain or TLS WebSocket stream as returned by `connect_async`.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Knows where the executor's `/ws` endpoint lives; holds no socket.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
}

/// One open progress channel, owned by a single watch session.
pub struct ComfyUIConnection {
    /// Prompts submitted with this `client_id` report on this socket.
    pub client_id: String,
    pub ws_stream: WsStream,
}

impl ComfyUIClient {
    /// `ws_url` is the base without `/ws`, e.g. `ws://127.0.0.1:8188`.
    pub fn new(ws_url: String) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open `{ws_url}/ws?clientId={client_id}`.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={client_id}", self.ws_url);
        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| ComfyUIClientError::Connection(format!("{url}: {e}")))?;

        tracing::debug!(client_id = %client_id, ws_url = %self.ws_url, "Progress channel open");

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

/// Derive the WebSocket base URL from an HTTP base URL
/// (`http` -> `ws`, `https` -> `wss`).
pub fn ws_url_from_api_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{trimmed}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// The handshake failed: refused, DNS, or the upgrade was rejected.
    #[error("Cannot open progress channel at {0}")]
    Connection(String),

    /// The open socket misbehaved: early close, read error, bad frame.
    #[error("Progress channel failed: {0}")]
    Protocol(String),
}
