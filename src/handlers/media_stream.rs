//! Telephony media stream WebSocket.
//!
//! Each accepted connection is one call: the server dials the realtime
//! endpoint, negotiates the session and relays audio until either side ends.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::core::relay::{RelaySession, connect_upstream, split_axum};
use crate::state::AppState;

/// Maximum WebSocket frame size (1 MB)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Media stream WebSocket handler
///
/// Upgrades the HTTP connection and hands the socket to a relay session.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("Media stream connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            let span = info_span!("call", call_id = %Uuid::new_v4());
            handle_media_stream(socket, state).instrument(span)
        })
}

async fn handle_media_stream(socket: WebSocket, state: Arc<AppState>) {
    let _call = state.track_call();
    info!(active_calls = state.active_calls(), "Telephony client connected");

    let mut telephony = split_axum(socket);

    let ai = match connect_upstream(&state.config.upstream_settings()).await {
        Ok(ai) => ai,
        Err(e) => {
            error!("Failed to connect to realtime endpoint: {}", e);
            if let Err(e) = telephony.sink.close().await {
                debug!("Closing telephony socket failed: {}", e);
            }
            return;
        }
    };

    let mut session = RelaySession::new(telephony, ai, state.config.session_settings());
    session.send_initial_negotiation().await;
    let outcome = session.run().await;

    info!(
        ended_by = %outcome.ended_by,
        reason = %outcome.exit,
        audio_appended = outcome.stats.audio_appended,
        audio_forwarded = outcome.stats.audio_forwarded,
        interruptions = outcome.stats.interruptions,
        frames_skipped = outcome.stats.frames_skipped,
        "Call ended"
    );

    // A detached direction still holds a connection, so the call stays
    // counted until it stops.
    if let Some(detached) = outcome.detached {
        let direction = detached.direction();
        let exit = detached.wait().await;
        info!(direction = %direction, reason = %exit, "Call released");
    }
}
