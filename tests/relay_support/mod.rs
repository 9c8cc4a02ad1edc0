//! Mock realtime endpoint and server helpers for relay integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

pub mod realtime_mock;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use waav_relay::{ServerConfig, routes, state::AppState};

/// Install the TLS crypto provider once per test binary, as `main` does.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Minimal configuration pointing at a realtime endpoint URL.
pub fn test_config(realtime_url: &str) -> ServerConfig {
    let mut config = ServerConfig::new("sk-test");
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.realtime_url = realtime_url.to_string();
    config
}

/// Serve the relay on an ephemeral port and return its address.
pub async fn spawn_relay(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(config);
    let app = routes::create_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

/// A port nothing is listening on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
