//! # Audio Processing Module
//!
//! Turns a PCM container file into the binary frames sent to the transcription
//! service.
//!
//! ## Key Components:
//! - **Container decoder**: RIFF/WAVE chunk walking and i16 → f32 normalization
//! - **Framing**: fixed-size frame partitioning and little-endian f32 serialization
//!
//! ## Audio Format Requirements:
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (not checked; interleaved data is sent as-is)
//! - **Encoding**: Little-endian signed integers

pub mod container;    // RIFF/WAVE parsing
pub mod framing;      // Outbound frame partitioning and encoding

pub use container::{decode, probe_format, FormatInfo};
pub use framing::{encode_frame, frame_count, frames};
