//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `twiml` - Call webhook returning TwiML
//! - `media_stream` - Telephony media stream WebSocket, bridged to the realtime endpoint

pub mod api;
pub mod media_stream;
pub mod twiml;

pub use media_stream::media_stream_handler;
pub use twiml::incoming_call;
