use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override the corresponding environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 5050
///   public_host: "relay.example.com"
///
/// openai:
///   api_key: "sk-..."
///   realtime_url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-10-01"
///
/// relay:
///   voice: "alloy"
///   instructions: "You are a helpful assistant."
///   audio_format: "g711_alaw"
///   temperature: 0.8
///   sibling_policy: "close"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub openai: Option<OpenAIYaml>,
    pub relay: Option<RelayYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub public_host: Option<String>,
}

/// Realtime endpoint configuration from YAML
#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub realtime_url: Option<String>,
    pub model: Option<String>,
}

impl std::fmt::Debug for OpenAIYaml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIYaml")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("realtime_url", &self.realtime_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Per-call relay behaviour from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub audio_format: Option<String>,
    pub temperature: Option<f32>,
    pub sibling_policy: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse configuration from YAML text. An empty document is an empty config.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}
