//! # Transcription Protocol Messages
//!
//! Message contract between the client and the transcription service.
//!
//! ## Client → Server:
//! - **Binary**: audio frames (little-endian `f32` samples, see `audio::framing`)
//! - **Text**: the literal [`FLUSH_COMMAND`], sent once after the last frame
//!
//! ## Server → Client:
//! ```json
//! { "error": "<string>" }
//! { "transcription": "<string>", "duration": <number>,
//!   "segments": [ { "start": <number>, "end": <number>, "text": "<string>" } ] }
//! ```
//!
//! ## Classification:
//! Every inbound payload becomes exactly one [`ResultEnvelope`], checked in a
//! fixed priority order: error, then transcription, then unrecognized. The
//! classifier is memoryless and never fails; anything it cannot make sense of
//! is returned verbatim as `Unrecognized`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Text command telling the server that no more audio will arrive.
pub const FLUSH_COMMAND: &str = "flush";

/// One timed piece of a transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    pub text: String,
}

/// A successful transcription result.
///
/// ## Field Handling:
/// - `transcription` is required to *be present*, but `null` reads as empty text
/// - `duration` and `message` are optional
/// - missing or `null` `segments` read as an empty list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(rename = "transcription", default, deserialize_with = "null_as_default")]
    pub text: String,

    #[serde(default)]
    pub duration: Option<f64>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub segments: Vec<Segment>,

    /// Server note such as "No speech detected"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Outcome of classifying one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultEnvelope {
    /// The server reported a failure
    Error { message: String },
    /// The server sent a (possibly empty) transcription
    Transcription(Transcription),
    /// Not JSON, not an object, or an object matching no known shape
    Unrecognized(String),
}

impl ResultEnvelope {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ResultEnvelope::Error { .. } => "error",
            ResultEnvelope::Transcription(_) => "transcription",
            ResultEnvelope::Unrecognized(_) => "unrecognized",
        }
    }
}

/// Classify a raw inbound payload.
///
/// ## Transition Logic:
/// 1. Not parseable as JSON → `Unrecognized(raw)`
/// 2. `error` present and non-empty → `Error`
/// 3. `transcription` present (even `""` or `null`) → `Transcription`
/// 4. Anything else → `Unrecognized(raw)`
///
/// A `transcription` object with mistyped fields (e.g. a string `duration`)
/// is also `Unrecognized`: partial matches are never guessed at.
pub fn classify(payload: &[u8]) -> ResultEnvelope {
    let raw = || String::from_utf8_lossy(payload).into_owned();

    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(_) => return ResultEnvelope::Unrecognized(raw()),
    };

    let Some(object) = value.as_object() else {
        return ResultEnvelope::Unrecognized(raw());
    };

    if let Some(message) = object.get("error").and_then(error_message) {
        return ResultEnvelope::Error { message };
    }

    if object.contains_key("transcription") {
        return match Transcription::deserialize(&value) {
            Ok(transcription) => ResultEnvelope::Transcription(transcription),
            Err(err) => {
                tracing::debug!("Transcription payload has unexpected fields: {}", err);
                ResultEnvelope::Unrecognized(raw())
            }
        };
    }

    ResultEnvelope::Unrecognized(raw())
}

/// Extract the message of an `error` field if it counts as set.
///
/// Empty strings, `null`, `false` and `0` do not count. Non-string values are
/// rendered as JSON text.
fn error_message(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

const RULE_WIDTH: usize = 60;

impl fmt::Display for Transcription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(f, "{}", rule)?;
        writeln!(f, "Transcription Result:")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Text: {}", self.text)?;
        match self.duration {
            Some(duration) => writeln!(f, "Duration: {}s", duration)?,
            None => writeln!(f, "Duration: N/A")?,
        }
        if let Some(message) = &self.message {
            writeln!(f, "Note: {}", message)?;
        }

        if !self.segments.is_empty() {
            writeln!(f)?;
            writeln!(f, "Segments:")?;
            for (i, seg) in self.segments.iter().enumerate() {
                writeln!(f, "  {}. [{:.2}s - {:.2}s] {}", i + 1, seg.start, seg.end, seg.text)?;
            }
        }

        write!(f, "{}", rule)
    }
}

impl fmt::Display for ResultEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultEnvelope::Error { message } => write!(f, "Error: {}", message),
            ResultEnvelope::Transcription(transcription) => write!(f, "{}", transcription),
            ResultEnvelope::Unrecognized(raw) => write!(f, "Received: {}", raw),
        }
    }
}
