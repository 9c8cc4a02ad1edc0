//! Relay session configuration types.
//!
//! This module contains the values a session negotiates with the realtime
//! endpoint (audio format, voice, instructions, temperature) and the policy the
//! session applies when one direction of the relay ends.

use serde::{Deserialize, Serialize};

/// Default system instructions sent in the negotiation.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful and bubbly AI assistant who loves to chat about \
anything the user is interested about and is prepared to offer them facts. You have a penchant for dad \
jokes, owl jokes, and rickrolling – subtly. Always stay positive, but work in a joke when appropriate.";

/// Default sampling temperature sent in the negotiation.
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

// =============================================================================
// Voices
// =============================================================================

/// Voices accepted by the realtime endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayVoice {
    /// Alloy voice (default)
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl RelayVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "alloy" => Self::Alloy,
            "ash" => Self::Ash,
            "ballad" => Self::Ballad,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            other => {
                tracing::warn!("Unknown voice '{}', falling back to {}", other, Self::default());
                Self::default()
            }
        }
    }
}

impl std::fmt::Display for RelayVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Audio Formats
// =============================================================================

/// Audio encoding exchanged verbatim by both peers.
///
/// The relay never transcodes, so the same format is negotiated for input and
/// output and must match what the telephony side streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioFormat {
    /// G.711 a-law, 8kHz (default)
    #[default]
    #[serde(rename = "g711_alaw")]
    G711Alaw,
    /// G.711 u-law, 8kHz
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// PCM 16-bit signed little-endian, 24kHz
    #[serde(rename = "pcm16")]
    Pcm16,
}

impl AudioFormat {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::G711Alaw => "g711_alaw",
            Self::G711Ulaw => "g711_ulaw",
            Self::Pcm16 => "pcm16",
        }
    }

    /// Parse a format name, accepting the common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "g711_alaw" | "alaw" | "pcma" => Some(Self::G711Alaw),
            "g711_ulaw" | "ulaw" | "mulaw" | "pcmu" => Some(Self::G711Ulaw),
            "pcm16" | "pcm" | "linear16" => Some(Self::Pcm16),
            _ => None,
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Sibling Policy
// =============================================================================

/// What the session does with the other direction once one pump has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingPolicy {
    /// Stop the sibling pump and close both write halves.
    #[default]
    Close,
    /// Leave the sibling pump running until its own connection fails.
    Detach,
}

impl SiblingPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "close" => Some(Self::Close),
            "detach" => Some(Self::Detach),
            _ => None,
        }
    }
}

// =============================================================================
// Session Settings
// =============================================================================

/// Static per-session configuration handed to [`RelaySession::new`].
///
/// [`RelaySession::new`]: super::RelaySession::new
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Voice for audio output
    pub voice: RelayVoice,
    /// System instructions for the assistant
    pub instructions: String,
    /// Audio format used for both input and output
    pub audio_format: AudioFormat,
    /// Sampling temperature
    pub temperature: f32,
    /// Sibling handling once one direction ends
    pub sibling_policy: SiblingPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            voice: RelayVoice::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            audio_format: AudioFormat::default(),
            temperature: DEFAULT_TEMPERATURE,
            sibling_policy: SiblingPolicy::default(),
        }
    }
}
