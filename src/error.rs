//! # Error Handling
//!
//! This module defines the error taxonomy of the streaming client and how foreign
//! errors (I/O, configuration, WebSocket) are converted into it.
//!
//! ## Error Categories:
//! - **Format**: The container header tags are wrong. Fatal, raised before any connection.
//! - **TruncatedData**: No data chunk, or a chunk runs past the end of the file. Fatal.
//! - **Transport / Unreachable**: Connection or write failures. Fatal for the session.
//! - **Io / Config**: Local problems reading the input file or loading settings.
//!
//! Malformed responses from the server are *not* errors here: they are classified
//! as [`crate::protocol::ResultEnvelope::Unrecognized`] and the session keeps going.
//!
//! ## Rust Concepts:
//! - **thiserror**: Derives `Display` and `std::error::Error` from the `#[error]` attributes
//! - **#[from]**: Generates `From` impls so `?` converts foreign errors automatically

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// All the ways the client can fail.
///
/// ## Usage Example:
/// ```rust
/// use wav_stream_client::error::ClientError;
/// let err = ClientError::Format("expected RIFF tag".to_string());
/// assert!(err.to_string().starts_with("Format error"));
/// ```
#[derive(Debug, Error)]
pub enum ClientError {
    /// The container's fixed header does not carry the expected tags
    #[error("Format error: {0}")]
    Format(String),

    /// The data chunk is missing or a chunk length runs past the buffer end
    #[error("Truncated data: {0}")]
    TruncatedData(String),

    /// The connection failed mid-session (write error, protocol error, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote endpoint refused the connection
    #[error("Connection refused by {url}. Is the server running?")]
    Unreachable {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the input file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file or environment variable problems
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether the error happened before any network activity.
    ///
    /// Decode failures abort the run before a connection is attempted;
    /// `main` uses this to tell a bad input file apart from a failed session.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, ClientError::Format(_) | ClientError::TruncatedData(_))
    }
}

/// Automatic conversion from WebSocket errors.
///
/// ## Why Transport:
/// Once the handshake is done every tungstenite failure ends the session, so they
/// all land in the same bucket. Refused connections are handled separately by
/// [`crate::session::connect`] because they get a hint for the user.
impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// Automatic conversion from configuration loading errors.
impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
///
/// ## Purpose:
/// Shorthand for `Result<T, ClientError>` so signatures read `ClientResult<Vec<f32>>`.
pub type ClientResult<T> = Result<T, ClientError>;
