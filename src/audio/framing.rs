//! # Outbound Frame Encoding
//!
//! Splits a sample sequence into fixed-size frames and serializes each frame
//! for the wire.
//!
//! ## Wire Format:
//! A frame is the raw concatenation of its samples as 32-bit little-endian
//! floats. There is no header; the WebSocket message boundary delimits frames.
//! All frames hold `chunk_samples` samples except possibly the last one.

use std::num::NonZeroUsize;

/// Consecutive frames of at most `chunk_samples` samples, in order.
pub fn frames(samples: &[f32], chunk_samples: NonZeroUsize) -> std::slice::Chunks<'_, f32> {
    samples.chunks(chunk_samples.get())
}

/// Number of frames `frames` will yield: `ceil(len / chunk_samples)`.
pub fn frame_count(len: usize, chunk_samples: NonZeroUsize) -> usize {
    len.div_ceil(chunk_samples.get())
}

/// Serialize one frame as contiguous little-endian `f32` values.
pub fn encode_frame(frame: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.len() * 4);
    for &sample in frame {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
