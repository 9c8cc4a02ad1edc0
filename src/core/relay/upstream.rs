//! Dialing the realtime endpoint.

use tokio_tungstenite::tungstenite;
use tracing::info;
use url::Url;

use super::base::{CallConnection, RelayError, RelayResult};
use super::transport::split_tungstenite;

/// Where and how to reach the realtime endpoint.
#[derive(Clone)]
pub struct UpstreamSettings {
    /// Base WebSocket URL, without the model query
    pub url: String,
    /// Model requested in the `model` query parameter
    pub model: String,
    /// Bearer token
    pub api_key: String,
}

impl std::fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl Drop for UpstreamSettings {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.api_key.zeroize();
    }
}

impl UpstreamSettings {
    /// Full endpoint URL with the model query appended.
    pub fn endpoint(&self) -> RelayResult<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| RelayError::InvalidConfiguration(format!("realtime url: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RelayError::InvalidConfiguration(format!(
                "realtime url must use ws or wss, got {}",
                url.scheme()
            )));
        }
        if !self.model.is_empty() {
            url.query_pairs_mut().append_pair("model", &self.model);
        }
        Ok(url)
    }
}

/// `Host` header value for a URL, including a non-default port.
fn host_header(url: &Url) -> RelayResult<String> {
    let host = url
        .host_str()
        .ok_or_else(|| RelayError::InvalidConfiguration("realtime url has no host".to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Dial the realtime endpoint and split the stream into a relay connection.
pub async fn connect_upstream(settings: &UpstreamSettings) -> RelayResult<CallConnection> {
    let url = settings.endpoint()?;

    let request = http::Request::builder()
        .uri(url.as_str())
        .header("Authorization", format!("Bearer {}", settings.api_key))
        .header("OpenAI-Beta", "realtime=v1")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host_header(&url)?)
        .body(())
        .map_err(|e| RelayError::UpstreamConnect(e.to_string()))?;

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| RelayError::UpstreamConnect(e.to_string()))?;

    info!(model = %settings.model, "Connected to realtime endpoint");
    Ok(split_tungstenite(stream))
}
