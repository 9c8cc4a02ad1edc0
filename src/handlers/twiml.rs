//! Call webhook for the telephony provider.
//!
//! The provider requests `/incoming-call` when a call arrives and executes the
//! returned TwiML: a short greeting, then a bidirectional media stream to this
//! server's `/media-stream` endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use tracing::info;

use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

const GREETING: &str = "Please wait while we connect your call to the AI voice assistant.";
const READY_PROMPT: &str = "O.K., you can start talking!";

/// Handle `GET|POST /incoming-call`.
pub async fn incoming_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let host = match &state.config.public_host {
        Some(host) => host.clone(),
        None => headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("missing Host header".to_string()))?,
    };

    if !is_valid_host(&host) {
        return Err(AppError::BadRequest(format!("invalid host: {host}")));
    }

    info!(host = %host, "Incoming call, connecting media stream");
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/xml"))],
        render_twiml(&host),
    )
        .into_response())
}

/// TwiML that greets the caller and connects the media stream.
pub fn render_twiml(host: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Say>{GREETING}</Say>
    <Pause length="1"/>
    <Say>{READY_PROMPT}</Say>
    <Connect>
        <Stream url="wss://{host}/media-stream" />
    </Connect>
</Response>"#
    )
}

/// Hostname with optional port; nothing that needs escaping inside XML.
fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
}
