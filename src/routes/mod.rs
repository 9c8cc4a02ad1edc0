pub mod api;
pub mod relay;

use std::sync::Arc;

use axum::Router;
use http::HeaderValue;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::state::AppState;

/// Build the full application router over shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Security headers
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    api::create_api_router()
        .merge(relay::create_relay_router())
        .with_state(state)
        .layer(security_headers)
}
