//! # wav-stream-client - Main Application Entry Point
//!
//! Command line front end: parses arguments, loads configuration, sets up
//! logging and streams one file to the transcription service.
//!
//! ## Usage:
//! ```text
//! wav-stream-client input.wav
//! wav-stream-client --url ws://10.0.0.5:9000 input.wav
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wav_stream_client::config::AppConfig;

/// Stream a 16-bit PCM WAV file to a WebSocket transcription server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// WAV file to send
    audio_file: PathBuf,

    /// Server endpoint, overrides config.toml and APP_SERVER__URL
    #[arg(long)]
    url: Option<String>,
}

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads environment** from a `.env` file if present
/// 2. **Sets up logging** for progress and results
/// 3. **Loads configuration** and applies command line overrides
/// 4. **Streams the file** and waits until the server closes the connection
///
/// Any fatal error is returned, which makes the process exit non-zero.
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();

    let mut config = AppConfig::load().context("Failed to load configuration")?;
    if let Some(url) = cli.url {
        config = config.with_url(url);
    }
    config.validate()?;

    info!("Starting wav-stream-client v{}", env!("CARGO_PKG_VERSION"));

    let report = match wav_stream_client::stream_file(&cli.audio_file, &config).await {
        Ok(report) => report,
        Err(err) if err.is_decode_error() => {
            let reason = format!("{} is not a usable WAV file", cli.audio_file.display());
            return Err(anyhow::Error::new(err).context(reason));
        }
        Err(err) => {
            let reason = format!("Failed to stream {}", cli.audio_file.display());
            return Err(anyhow::Error::new(err).context(reason));
        }
    };

    info!(
        "Session {} finished: {} chunks ({} samples) sent, {} result(s), {} error(s), {} unrecognized in {:.1}s",
        report.session_id,
        report.sent.frames_sent,
        report.sent.samples_sent,
        report.received.transcriptions,
        report.received.errors,
        report.received.unrecognized,
        report.elapsed_seconds
    );

    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "wav_stream_client=debug")
/// - If not set, defaults to "wav_stream_client=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wav_stream_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
