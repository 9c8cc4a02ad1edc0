//! Media stream WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::media_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media stream router
///
/// # Endpoint
///
/// `GET /media-stream` - WebSocket upgrade for the telephony media stream
///
/// # Protocol
///
/// The telephony provider sends JSON text frames tagged by `event`:
/// - `start` carrying `start.streamSid`
/// - `media` carrying `media.payload`, relayed to the realtime endpoint
///
/// The server sends back `media` frames with the assistant's audio, tagged
/// with the stream id.
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
