//! Wire event types for both relay peers.
//!
//! # Telephony Media Stream
//!
//! Inbound frames are tagged by `event`:
//! - start - Stream started, carries the stream identifier
//! - media - Audio fragment (opaque, usually base64)
//! - anything else - accepted and ignored
//!
//! Outbound frames are `media` events tagged with the stream identifier.
//!
//! # Realtime Endpoint
//!
//! Client events (sent to the endpoint):
//! - session.update - One-time session negotiation
//! - input_audio_buffer.append - Append caller audio
//! - response.cancel - Interrupt the current response
//!
//! Server events (received from the endpoint), tagged by `type`:
//! - response.create / response.created - Response generation started
//! - response.done - Response complete
//! - response.audio.delta - Audio data chunk
//! - error - Error occurred
//! - session.created / session.updated - Session lifecycle
//!
//! Frames with a tag this module does not know decode to an explicit
//! `Unrecognized` variant instead of failing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::base::{RelayError, RelayResult};
use super::config::SessionSettings;

// =============================================================================
// Decoding
// =============================================================================

/// Errors produced while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame is not valid JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The frame has no string discriminator
    #[error("missing `{0}` tag")]
    MissingTag(&'static str),

    /// A known event is missing fields or has the wrong shape
    #[error("malformed `{tag}` event: {source}")]
    Malformed {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<WireError> for RelayError {
    fn from(e: WireError) -> Self {
        RelayError::MalformedFrame(e.to_string())
    }
}

enum Decoded<K> {
    Known(K),
    Unrecognized(String),
}

/// Decode a frame tagged by `tag_field`, only attempting the typed decode for
/// tags listed in `known`.
fn decode_tagged<K: DeserializeOwned>(
    text: &str,
    tag_field: &'static str,
    known: &[&str],
) -> Result<Decoded<K>, WireError> {
    let value: Value = serde_json::from_str(text).map_err(WireError::InvalidJson)?;
    let tag = value
        .get(tag_field)
        .and_then(Value::as_str)
        .ok_or(WireError::MissingTag(tag_field))?
        .to_string();

    if !known.contains(&tag.as_str()) {
        return Ok(Decoded::Unrecognized(tag));
    }

    serde_json::from_value(value)
        .map(Decoded::Known)
        .map_err(|source| WireError::Malformed { tag, source })
}

// =============================================================================
// Telephony Events
// =============================================================================

/// Audio fragment carried in telephony `media` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Opaque audio payload, forwarded verbatim
    pub payload: String,
}

/// Body of a telephony `start` event.
#[derive(Debug, Clone, Deserialize)]
struct StreamStart {
    #[serde(rename = "streamSid", alias = "streamId")]
    stream_sid: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum KnownTelephonyEvent {
    Start { start: StreamStart },
    Media { media: MediaPayload },
}

const TELEPHONY_EVENTS: &[&str] = &["start", "media"];

/// Events received from the telephony media stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyEvent {
    /// Stream started
    Start {
        /// Stream identifier used to tag outbound media
        stream_sid: String,
    },
    /// Caller audio
    Media {
        /// Opaque audio payload
        payload: String,
    },
    /// Any other event name
    Unrecognized {
        /// The `event` value as received
        event: String,
    },
}

impl TelephonyEvent {
    /// Decode one text frame from the telephony side.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let event = match decode_tagged::<KnownTelephonyEvent>(text, "event", TELEPHONY_EVENTS)? {
            Decoded::Known(KnownTelephonyEvent::Start { start }) => TelephonyEvent::Start {
                stream_sid: start.stream_sid,
            },
            Decoded::Known(KnownTelephonyEvent::Media { media }) => TelephonyEvent::Media {
                payload: media.payload,
            },
            Decoded::Unrecognized(event) => TelephonyEvent::Unrecognized { event },
        };
        Ok(event)
    }
}

/// Events sent to the telephony media stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutbound {
    /// Assistant audio for the caller
    Media {
        /// Stream identifier, empty if no `start` was seen yet
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Audio fragment
        media: MediaPayload,
    },
}

impl TelephonyOutbound {
    /// Build a media frame for the given stream.
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        TelephonyOutbound::Media {
            stream_sid: stream_sid.into(),
            media: MediaPayload {
                payload: payload.into(),
            },
        }
    }

    /// Serialize into a text frame.
    pub fn encode(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent in `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Turn detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl SessionConfig {
    /// Build the negotiation for a relay session.
    ///
    /// Input and output share one format since audio is passed through untouched.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        let format = settings.audio_format.as_str().to_string();
        Self {
            turn_detection: Some(TurnDetection::server_vad()),
            input_audio_format: Some(format.clone()),
            output_audio_format: Some(format),
            voice: Some(settings.voice.as_str().to_string()),
            instructions: Some(settings.instructions.clone()),
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            temperature: Some(settings.temperature),
        }
    }
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
}

impl TurnDetection {
    /// Server VAD with the endpoint's own defaults.
    pub fn server_vad() -> Self {
        TurnDetection::ServerVad {
            threshold: None,
            prefix_padding_ms: None,
            silence_duration_ms: None,
        }
    }
}

// =============================================================================
// Client Events (sent to the realtime endpoint)
// =============================================================================

/// Client events sent to the realtime endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Audio payload as received from telephony
        audio: String,
    },

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event for an opaque payload.
    pub fn audio_append(payload: impl Into<String>) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: payload.into(),
        }
    }

    /// Serialize into a text frame.
    pub fn encode(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// Server Events (received from the realtime endpoint)
// =============================================================================

/// API error information.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum KnownServerEvent {
    #[serde(rename = "response.create", alias = "response.created")]
    ResponseStarted,
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "error")]
    Error { error: ApiError },
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionInfo },
    #[serde(rename = "session.updated")]
    SessionUpdated,
}

const SERVER_EVENTS: &[&str] = &[
    "response.create",
    "response.created",
    "response.done",
    "response.audio.delta",
    "response.output_audio.delta",
    "error",
    "session.created",
    "session.updated",
];

/// Events received from the realtime endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Response generation started
    ResponseStarted,
    /// Response generation finished
    ResponseDone,
    /// Audio data chunk
    AudioDelta {
        /// Opaque audio delta, may be empty
        delta: String,
    },
    /// Error reported by the endpoint
    Error {
        /// Error details
        error: ApiError,
    },
    /// Session created
    SessionCreated {
        /// Session ID, if reported
        session_id: Option<String>,
    },
    /// Session configuration applied
    SessionUpdated,
    /// Any other event type
    Unrecognized {
        /// The `type` value as received
        event_type: String,
    },
}

impl ServerEvent {
    /// Decode one text frame from the realtime endpoint.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let event = match decode_tagged::<KnownServerEvent>(text, "type", SERVER_EVENTS)? {
            Decoded::Known(known) => match known {
                KnownServerEvent::ResponseStarted => ServerEvent::ResponseStarted,
                KnownServerEvent::ResponseDone => ServerEvent::ResponseDone,
                KnownServerEvent::AudioDelta { delta } => ServerEvent::AudioDelta { delta },
                KnownServerEvent::Error { error } => ServerEvent::Error { error },
                KnownServerEvent::SessionCreated { session } => ServerEvent::SessionCreated {
                    session_id: session.id,
                },
                KnownServerEvent::SessionUpdated => ServerEvent::SessionUpdated,
            },
            Decoded::Unrecognized(event_type) => ServerEvent::Unrecognized { event_type },
        };
        Ok(event)
    }
}

// =============================================================================
// Tests
// =============================================================================
