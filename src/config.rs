//! # Configuration Management
//!
//! This module handles loading the gateway configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` environment variables (deployment platforms)
//! 2. Environment variables such as `APP_SERVER__PORT` or `APP_SESSION__MAX_BUFFERED_BYTES`
//!    (`__` separates nesting levels so field names may keep their underscores)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::transcription::model::ModelSize;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub transcription: TranscriptionSettings,
    pub session: SessionConfig,
}

/// Where the gateway listens.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Settings for the inference worker and the model it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    /// Language hint passed to every transcription call (ISO 639-1)
    pub language: String,

    /// Utterances shorter than this are answered with empty text without inference
    pub min_utterance_seconds: f64,

    /// Whisper model variant, downloaded from the Hugging Face hub when no path is given
    pub model: ModelSize,

    /// Local ggml model file; takes precedence over `model`
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Inference threads handed to whisper.cpp (its own default when unset)
    #[serde(default)]
    pub threads: Option<u16>,
}

/// Per-connection limits.
///
/// ## Tuning guidelines:
/// - `max_buffered_bytes` bounds memory per client: 32000 bytes hold one second of audio
/// - `max_concurrent_sessions` bounds the number of open WebSocket connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_buffered_bytes: usize,
    pub max_concurrent_sessions: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8765,
            },
            transcription: TranscriptionSettings {
                language: "ja".to_string(),
                min_utterance_seconds: 0.5,
                model: ModelSize::Small,
                model_path: None,
                threads: None,
            },
            session: SessionConfig {
                max_buffered_bytes: 3_840_000, // two minutes of 16kHz mono PCM
                max_concurrent_sessions: 64,
                heartbeat_interval_secs: 15,
                client_timeout_secs: 60,
                max_frame_bytes: 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings
            .build()?
            .try_deserialize()
            .context("failed to deserialize gateway configuration")?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.transcription.language.trim().is_empty() {
            return Err(anyhow::anyhow!("Transcription language hint cannot be empty"));
        }

        if !(self.transcription.min_utterance_seconds >= 0.0) {
            return Err(anyhow::anyhow!(
                "Minimum utterance duration must be a non-negative number of seconds"
            ));
        }

        if self.session.max_buffered_bytes < 2 {
            return Err(anyhow::anyhow!(
                "Max buffered bytes must hold at least one 16-bit sample"
            ));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.session.heartbeat_interval_secs == 0
            || self.session.client_timeout_secs <= self.session.heartbeat_interval_secs
        {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than a non-zero heartbeat interval"
            ));
        }

        if self.session.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("Max frame size must be greater than 0"));
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.transcription.language, "ja");
        assert_eq!(config.transcription.min_utterance_seconds, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.max_buffered_bytes = 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.transcription.min_utterance_seconds = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.client_timeout_secs = config.session.heartbeat_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_round_trip_through_config_crate() {
        let loaded: AppConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(loaded.server.port, 8765);
        assert_eq!(loaded.transcription.model, ModelSize::Small);
        assert_eq!(loaded.transcription.model_path, None);
        assert_eq!(loaded.session.max_buffered_bytes, 3_840_000);
    }

    #[test]
    fn test_bind_addr() {
        let config = AppConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8765");
    }
}
