//! Telephony ⇄ realtime-AI call relay.
//!
//! Bridges a telephony media stream and a realtime voice endpoint for one call,
//! passing audio through untouched in both directions and cancelling the
//! assistant's response when the caller talks over it (barge-in).
//!
//! # Architecture
//!
//! - [`RelaySession`] owns both connections and runs one pump per direction
//! - [`TurnState`] is the only state shared by the pumps
//! - [`FrameSource`] / [`FrameSink`] is the transport seam; adapters exist for
//!   axum, tokio-tungstenite and in-memory channels
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_relay::core::relay::{
//!     RelaySession, SessionSettings, UpstreamSettings, connect_upstream, split_axum,
//! };
//!
//! async fn bridge(socket: axum::extract::ws::WebSocket, upstream: UpstreamSettings) {
//!     let ai = connect_upstream(&upstream).await.unwrap();
//!     let session = RelaySession::new(split_axum(socket), ai, SessionSettings::default());
//!     let outcome = session.run().await;
//!     println!("{} ended: {}", outcome.ended_by, outcome.exit);
//! }
//! ```

mod base;
mod config;
pub mod messages;
mod pumps;
mod session;
pub mod transport;
mod turn;
mod upstream;

pub use base::{
    CallConnection, Direction, FrameSink, FrameSource, PumpExit, RelayError, RelayResult,
};
pub use config::{
    AudioFormat, DEFAULT_INSTRUCTIONS, DEFAULT_TEMPERATURE, RelayVoice, SessionSettings,
    SiblingPolicy,
};
pub use messages::WireError;
pub use pumps::{RelayStats, RelayStatsSnapshot};
pub use session::{DetachedPump, RelaySession, SessionOutcome};
pub use transport::{MemoryPeer, memory_connection, split_axum, split_tungstenite};
pub use turn::{TurnPhase, TurnState};
pub use upstream::{UpstreamSettings, connect_upstream};
