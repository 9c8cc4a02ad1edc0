use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, twiml};
use crate::state::AppState;
use std::sync::Arc;

/// Create the HTTP router: health check and the call webhook
///
/// The telephony provider may request the webhook with either GET or POST.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route(
            "/incoming-call",
            get(twiml::incoming_call).post(twiml::incoming_call),
        )
        .layer(TraceLayer::new_for_http())
}
