//! Configuration module for the relay server
//!
//! Configuration comes from environment variables (a `.env` file is loaded into
//! the environment by `main`) and, optionally, a YAML file whose values take
//! priority. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use waav_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::core::relay::{
    AudioFormat, DEFAULT_INSTRUCTIONS, DEFAULT_TEMPERATURE, RelayVoice, SessionSettings,
    SiblingPolicy, UpstreamSettings,
};

mod yaml;

pub use yaml::{OpenAIYaml, RelayYaml, ServerYaml, YamlConfig};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5050;
pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Server configuration
///
/// Contains everything needed to run the relay:
/// - Server settings (host, port, public host for the call webhook)
/// - Realtime endpoint settings (URL, model, API key)
/// - Per-call relay behaviour (voice, instructions, audio format, temperature,
///   sibling policy)
#[derive(Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Host advertised in the call webhook's stream URL. Falls back to the
    /// request `Host` header when unset.
    pub public_host: Option<String>,

    // Realtime endpoint
    pub openai_api_key: String,
    pub realtime_url: String,
    pub realtime_model: String,

    // Relay behaviour
    pub voice: RelayVoice,
    pub instructions: String,
    pub audio_format: AudioFormat,
    pub temperature: f32,
    pub sibling_policy: SiblingPolicy,
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.openai_api_key.zeroize();
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("public_host", &self.public_host)
            .field("openai_api_key", &"[REDACTED]")
            .field("realtime_url", &self.realtime_url)
            .field("realtime_model", &self.realtime_model)
            .field("voice", &self.voice)
            .field("audio_format", &self.audio_format)
            .field("temperature", &self.temperature)
            .field("sibling_policy", &self.sibling_policy)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Configuration with every default applied and the given API key.
    pub fn new(openai_api_key: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            public_host: None,
            openai_api_key: openai_api_key.into(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            realtime_model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: RelayVoice::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            audio_format: AudioFormat::default(),
            temperature: DEFAULT_TEMPERATURE,
            sibling_policy: SiblingPolicy::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation
    /// fails (for example `OPENAI_API_KEY` is missing).
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::merge(YamlConfig::default())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Environment variables provide the base and any value present in the
    /// file overrides them. The merged result is validated.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is malformed, an
    /// environment variable has an invalid format, or validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        let config = Self::merge(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-call settings handed to each relay session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            voice: self.voice,
            instructions: self.instructions.clone(),
            audio_format: self.audio_format,
            temperature: self.temperature,
            sibling_policy: self.sibling_policy,
        }
    }

    /// Where each session dials the realtime endpoint.
    pub fn upstream_settings(&self) -> UpstreamSettings {
        UpstreamSettings {
            url: self.realtime_url.clone(),
            model: self.realtime_model.clone(),
            api_key: self.openai_api_key.clone(),
        }
    }

    /// Check the merged configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.openai_api_key.trim().is_empty() {
            return Err(ConfigError::Missing("OPENAI_API_KEY"));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid {
                key: "RELAY_TEMPERATURE",
                value: self.temperature.to_string(),
            });
        }

        let url_ok = Url::parse(&self.realtime_url)
            .map(|url| matches!(url.scheme(), "ws" | "wss"))
            .unwrap_or(false);
        if !url_ok {
            return Err(ConfigError::Invalid {
                key: "OPENAI_REALTIME_URL",
                value: self.realtime_url.clone(),
            });
        }

        Ok(())
    }

    /// Environment variables as the base, YAML values on top, defaults last.
    fn merge(yaml: YamlConfig) -> Result<Self, ConfigError> {
        let server = yaml.server.unwrap_or_default();
        let openai = yaml.openai.unwrap_or_default();
        let relay = yaml.relay.unwrap_or_default();

        let port = match server.port {
            Some(port) => port,
            None => parse_env("PORT", |v| v.parse().ok())?.unwrap_or(DEFAULT_PORT),
        };

        let voice = relay
            .voice
            .or_else(|| env_var("RELAY_VOICE"))
            .map(|v| RelayVoice::from_str_or_default(&v))
            .unwrap_or_default();

        let audio_format = match relay.audio_format {
            Some(value) => AudioFormat::parse(&value).ok_or(ConfigError::Invalid {
                key: "RELAY_AUDIO_FORMAT",
                value,
            })?,
            None => parse_env("RELAY_AUDIO_FORMAT", AudioFormat::parse)?.unwrap_or_default(),
        };

        let temperature = match relay.temperature {
            Some(t) => t,
            None => parse_env("RELAY_TEMPERATURE", |v| v.parse().ok())?
                .unwrap_or(DEFAULT_TEMPERATURE),
        };

        let sibling_policy = match relay.sibling_policy {
            Some(value) => SiblingPolicy::parse(&value).ok_or(ConfigError::Invalid {
                key: "RELAY_SIBLING_POLICY",
                value,
            })?,
            None => parse_env("RELAY_SIBLING_POLICY", SiblingPolicy::parse)?.unwrap_or_default(),
        };

        Ok(Self {
            host: server
                .host
                .or_else(|| env_var("HOST"))
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            public_host: server.public_host.or_else(|| env_var("PUBLIC_HOST")),
            openai_api_key: openai
                .api_key
                .or_else(|| env_var("OPENAI_API_KEY"))
                .unwrap_or_default(),
            realtime_url: openai
                .realtime_url
                .or_else(|| env_var("OPENAI_REALTIME_URL"))
                .unwrap_or_else(|| DEFAULT_REALTIME_URL.to_string()),
            realtime_model: openai
                .model
                .or_else(|| env_var("OPENAI_REALTIME_MODEL"))
                .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string()),
            voice,
            instructions: relay
                .instructions
                .or_else(|| env_var("RELAY_INSTRUCTIONS"))
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            audio_format,
            temperature,
            sibling_policy,
        })
    }
}

/// Non-empty environment variable, trimmed.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T>(
    key: &'static str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    match env_var(key) {
        Some(value) => match parse(&value) {
            Some(parsed) => Ok(Some(parsed)),
            None => Err(ConfigError::Invalid { key, value }),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    const ENV_KEYS: &[&str] = &[
        "HOST",
        "PORT",
        "PUBLIC_HOST",
        "OPENAI_API_KEY",
        "OPENAI_REALTIME_URL",
        "OPENAI_REALTIME_MODEL",
        "RELAY_VOICE",
        "RELAY_INSTRUCTIONS",
        "RELAY_AUDIO_FORMAT",
        "RELAY_TEMPERATURE",
        "RELAY_SIBLING_POLICY",
    ];

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            for key in ENV_KEYS {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5050);
        assert_eq!(config.public_host, None);
        assert_eq!(config.openai_api_key, "sk-env");
        assert_eq!(config.realtime_url, DEFAULT_REALTIME_URL);
        assert_eq!(config.realtime_model, DEFAULT_REALTIME_MODEL);
        assert_eq!(config.voice, RelayVoice::Alloy);
        assert_eq!(config.audio_format, AudioFormat::G711Alaw);
        assert_eq!(config.sibling_policy, SiblingPolicy::Close);
        assert_eq!(config.instructions, DEFAULT_INSTRUCTIONS);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_custom_values() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("PORT", "6000");
            env::set_var("PUBLIC_HOST", "relay.example.com");
            env::set_var("RELAY_VOICE", "verse");
            env::set_var("RELAY_AUDIO_FORMAT", "mulaw");
            env::set_var("RELAY_TEMPERATURE", "1.1");
            env::set_var("RELAY_SIBLING_POLICY", "detach");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.public_host, Some("relay.example.com".to_string()));
        assert_eq!(config.voice, RelayVoice::Verse);
        assert_eq!(config.audio_format, AudioFormat::G711Ulaw);
        assert!((config.temperature - 1.1).abs() < f32::EPSILON);
        assert_eq!(config.sibling_policy, SiblingPolicy::Detach);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_api_key() {
        cleanup_env_vars();
        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::Missing("OPENAI_API_KEY"))
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_port() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("PORT", "eighty");
        }

        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_audio_format() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("RELAY_AUDIO_FORMAT", "opus");
        }

        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "RELAY_AUDIO_FORMAT",
                ..
            }
        ));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_unknown_voice_falls_back() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("RELAY_VOICE", "robot");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.voice, RelayVoice::Alloy);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 8080

openai:
  api_key: "sk-yaml"

relay:
  voice: "coral"
  sibling_policy: "detach"
"#;
        fs::write(&config_path, yaml_content).unwrap();

        let config = ServerConfig::from_file(&config_path).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.openai_api_key, "sk-yaml");
        assert_eq!(config.voice, RelayVoice::Coral);
        assert_eq!(config.sibling_policy, SiblingPolicy::Detach);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  port: 8080

relay:
  temperature: 0.6
"#;
        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("HOST", "10.0.0.1");
            env::set_var("PORT", "9000");
            env::set_var("RELAY_TEMPERATURE", "1.0");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();
        // YAML wins where present, env fills in the rest.
        assert_eq!(config.port, 8080);
        assert!((config.temperature - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.openai_api_key, "sk-env");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_sibling_policy() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            "openai:\n  api_key: \"sk\"\nrelay:\n  sibling_policy: \"ignore\"\n",
        )
        .unwrap();

        let err = ServerConfig::from_file(&config_path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "RELAY_SIBLING_POLICY",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_temperature_range() {
        let mut config = ServerConfig::new("sk-test");
        config.temperature = 2.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "RELAY_TEMPERATURE",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_realtime_url_scheme() {
        let mut config = ServerConfig::new("sk-test");
        config.realtime_url = "https://api.openai.com/v1/realtime".to_string();
        assert!(config.validate().is_err());

        config.realtime_url = "ws://127.0.0.1:9000/v1/realtime".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_address() {
        let mut config = ServerConfig::new("sk-test");
        config.host = "127.0.0.1".to_string();
        config.port = 3001;
        assert_eq!(config.address(), "127.0.0.1:3001");
    }

    #[test]
    fn test_session_and_upstream_settings() {
        let mut config = ServerConfig::new("sk-test");
        config.voice = RelayVoice::Sage;
        config.sibling_policy = SiblingPolicy::Detach;

        let session = config.session_settings();
        assert_eq!(session.voice, RelayVoice::Sage);
        assert_eq!(session.sibling_policy, SiblingPolicy::Detach);

        let upstream = config.upstream_settings();
        assert_eq!(upstream.api_key, "sk-test");
        assert_eq!(upstream.model, DEFAULT_REALTIME_MODEL);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = ServerConfig::new("sk-very-secret");
        assert!(!format!("{config:?}").contains("sk-very-secret"));
    }
}
