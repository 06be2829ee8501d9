//! # Configuration Management
//!
//! This module handles loading the client configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Command line overrides (see `main.rs`)
//! 2. Environment variables (APP_SERVER__URL, APP_STREAMING__CHUNK_SAMPLES, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between the TOML/env representation and these structs
//! - **impl Default**: Documents sane starting values in one place

use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Main client configuration.
///
/// ## Why separate config structs:
/// Where to connect (`server`) and how to pace the audio (`streaming`) change
/// for different reasons, so they are grouped separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub streaming: StreamingConfig,
}

/// Remote transcription service settings.
///
/// ## Fields:
/// - `url`: WebSocket endpoint, e.g. `ws://127.0.0.1:9000`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,
}

/// Outbound streaming settings.
///
/// ## Fields:
/// - `chunk_samples`: Samples per binary frame (16000 = one second at 16kHz), never 0
/// - `pacing_ms`: Delay between consecutive frames, emulates real-time arrival
/// - `reference_sample_rate`: Rate the server expects; only used to warn about mismatching files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub chunk_samples: NonZeroUsize,
    pub pacing_ms: u64,
    pub reference_sample_rate: u32,
}

impl StreamingConfig {
    /// Pacing interval as a `Duration`.
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

// One second of 16kHz audio
const DEFAULT_CHUNK_SAMPLES: NonZeroUsize = match NonZeroUsize::new(16000) {
    Some(n) => n,
    None => unreachable!(),
};

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            pacing_ms: 100,
            reference_sample_rate: 16000, // Whisper's preferred sample rate
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                url: "ws://127.0.0.1:9000".to_string(),
            },
            streaming: StreamingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__URL=ws://10.0.0.5:9000`: Override the endpoint
    /// - `APP_STREAMING__PACING_MS=0`: Send as fast as the socket allows
    ///
    /// Nested keys use a double underscore because field names themselves
    /// contain single underscores.
    pub fn load() -> ClientResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Replace the endpoint, e.g. from a `--url` flag.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.server.url = url.into();
        self
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The endpoint is a `ws://` or `wss://` URL
    /// - The reference sample rate is not 0
    pub fn validate(&self) -> ClientResult<()> {
        let url = self.server.url.trim();
        if url.is_empty() {
            return Err(ClientError::Config("Server URL cannot be empty".to_string()));
        }

        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ClientError::Config(format!(
                "Server URL must use ws:// or wss://, got {}",
                url
            )));
        }

        if self.streaming.reference_sample_rate == 0 {
            return Err(ClientError::Config(
                "Reference sample rate must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
