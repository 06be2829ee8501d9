//! # wav-stream-client
//!
//! Streams a PCM WAV file to a remote transcription service over WebSocket and
//! reports the transcription results it sends back.
//!
//! ## Application Architecture:
//! - **audio**: container decoding and outbound frame encoding
//! - **protocol**: the message contract and the response classifier
//! - **session**: the connection, the paced send routine and the receive path
//! - **config**: application configuration (TOML files + environment variables)
//! - **error**: error taxonomy shared by every module

pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;

use crate::config::AppConfig;
use crate::error::ClientResult;
use crate::session::{SessionReport, StreamingSession};
use std::path::Path;
use tracing::{info, warn};

/// Decode `path` and stream it to the configured server.
///
/// ## Process:
/// 1. Read the whole file
/// 2. Warn about format settings the server will not expect
/// 3. Decode the samples (any decode error aborts here, before connecting)
/// 4. Connect and run one streaming session until the server closes it
pub async fn stream_file(path: &Path, config: &AppConfig) -> ClientResult<SessionReport> {
    info!("Loading audio file: {}", path.display());
    let bytes = tokio::fs::read(path).await?;

    if let Some(format) = audio::probe_format(&bytes) {
        info!(
            "Format: {} Hz, {} channel(s), {} bits per sample",
            format.sample_rate, format.channels, format.bits_per_sample
        );
        for warning in format.advisories(config.streaming.reference_sample_rate) {
            warn!("{}", warning);
        }
    }

    let samples = audio::decode(&bytes)?;
    info!(
        "Decoded {} samples ({:.2}s at {} Hz)",
        samples.len(),
        samples.len() as f64 / config.streaming.reference_sample_rate as f64,
        config.streaming.reference_sample_rate
    );

    let connection = session::connect(&config.server.url).await?;
    StreamingSession::new(samples, config.streaming.clone())
        .run(connection)
        .await
}
