//! # PCM Container Decoding
//!
//! Parses a canonical RIFF/WAVE container into normalized `f32` samples.
//!
//! ## Container Layout:
//! ```text
//! "RIFF" <u32 size> "WAVE"      12-byte fixed header (size is not validated)
//! <tag:4> <u32 len> <len bytes> chunk, repeated until the end of the buffer
//! ```
//!
//! Only the first `data` chunk carries samples. Every other chunk (`fmt `,
//! `LIST`, ...) is skipped by its declared length. The payload is signed
//! 16-bit little-endian PCM and is assumed to be mono.
//!
//! ## Normalization:
//! Each sample is divided by 32768.0, so -32768 maps to exactly -1.0 and 32767
//! maps to slightly less than +1.0. This asymmetry is intentional.

use crate::error::{ClientError, ClientResult};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Leading format tag of the container.
pub const RIFF_TAG: &[u8; 4] = b"RIFF";
/// Subformat tag at offset 8.
pub const WAVE_TAG: &[u8; 4] = b"WAVE";
/// Tag of the chunk holding the PCM payload.
pub const DATA_TAG: &[u8; 4] = b"data";
/// Tag of the format description chunk.
pub const FMT_TAG: &[u8; 4] = b"fmt ";

const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const PCM16_SCALE: f32 = 32768.0;

/// One tagged sub-block of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub tag: [u8; 4],
    pub payload: &'a [u8],
}

impl Chunk<'_> {
    /// Printable version of the tag for log and error messages.
    pub fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }
}

/// Iterator over the chunks following the fixed header.
///
/// ## Error Handling:
/// Yields `Err(TruncatedData)` once and then stops when a chunk header is cut
/// off or a declared length runs past the end of the buffer. Length fields are
/// trusted exactly: the cursor always advances by `8 + length`.
pub struct Chunks<'a> {
    buffer: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Chunks<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            offset: HEADER_LEN,
            failed: false,
        }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = ClientResult<Chunk<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buffer.len() {
            return None;
        }

        let remaining = self.buffer.len() - self.offset;
        if remaining < CHUNK_HEADER_LEN {
            self.failed = true;
            return Some(Err(ClientError::TruncatedData(format!(
                "chunk header at offset {} is cut off ({} bytes left)",
                self.offset, remaining
            ))));
        }

        let header = &self.buffer[self.offset..self.offset + CHUNK_HEADER_LEN];
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&header[..4]);
        let length = LittleEndian::read_u32(&header[4..]) as usize;

        let body_start = self.offset + CHUNK_HEADER_LEN;
        let available = self.buffer.len() - body_start;
        if length > available {
            self.failed = true;
            return Some(Err(ClientError::TruncatedData(format!(
                "chunk '{}' at offset {} declares {} bytes but only {} remain",
                String::from_utf8_lossy(&tag),
                self.offset,
                length,
                available
            ))));
        }

        self.offset = body_start + length;
        Some(Ok(Chunk {
            tag,
            payload: &self.buffer[body_start..body_start + length],
        }))
    }
}

/// Check the fixed header and return an iterator over the chunks behind it.
///
/// ## Returns:
/// - **Ok(Chunks)**: Header tags match `RIFF` / `WAVE`
/// - **Err(Format)**: Wrong tags, or the buffer is shorter than the header
pub fn chunks(buffer: &[u8]) -> ClientResult<Chunks<'_>> {
    if buffer.len() < HEADER_LEN {
        return Err(ClientError::Format(format!(
            "container is {} bytes, shorter than the {}-byte header",
            buffer.len(),
            HEADER_LEN
        )));
    }

    if &buffer[0..4] != RIFF_TAG {
        return Err(ClientError::Format(format!(
            "expected format tag 'RIFF', found '{}'",
            String::from_utf8_lossy(&buffer[0..4])
        )));
    }

    if &buffer[8..12] != WAVE_TAG {
        return Err(ClientError::Format(format!(
            "expected subformat tag 'WAVE', found '{}'",
            String::from_utf8_lossy(&buffer[8..12])
        )));
    }

    Ok(Chunks::new(buffer))
}

/// Decode a container into normalized samples.
///
/// ## Process:
/// 1. Validate the `RIFF` and `WAVE` tags
/// 2. Walk the chunks until the first `data` chunk
/// 3. Convert its payload from i16 LE to `f32` by dividing by 32768.0
///
/// A zero-length data chunk yields an empty vector. An odd trailing byte in
/// the data payload is ignored.
pub fn decode(buffer: &[u8]) -> ClientResult<Vec<f32>> {
    for chunk in chunks(buffer)? {
        let chunk = chunk?;
        if &chunk.tag == DATA_TAG {
            return Ok(pcm16_to_f32(chunk.payload));
        }
        tracing::debug!(
            "Skipping '{}' chunk ({} bytes)",
            chunk.tag_str(),
            chunk.payload.len()
        );
    }

    Err(ClientError::TruncatedData(
        "no data chunk found in container".to_string(),
    ))
}

/// Convert raw 16-bit little-endian PCM bytes to `f32` samples.
pub fn pcm16_to_f32(data: &[u8]) -> Vec<f32> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / PCM16_SCALE);
    }

    samples
}

/// Fields of the `fmt ` chunk.
///
/// ## Purpose:
/// Purely informational. Decoding never reads these values; they are only
/// used to warn when a file will not match what the server expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl FormatInfo {
    fn parse(payload: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(payload);
        Some(Self {
            audio_format: cursor.read_u16::<LittleEndian>().ok()?,
            channels: cursor.read_u16::<LittleEndian>().ok()?,
            sample_rate: cursor.read_u32::<LittleEndian>().ok()?,
            byte_rate: cursor.read_u32::<LittleEndian>().ok()?,
            block_align: cursor.read_u16::<LittleEndian>().ok()?,
            bits_per_sample: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }

    /// Human-readable warnings about settings this client does not handle.
    ///
    /// ## Checks:
    /// - Sample rate differs from `reference_rate` (no resampling is done)
    /// - More than one channel (samples would be interleaved)
    /// - Anything other than 16-bit integer PCM
    pub fn advisories(&self, reference_rate: u32) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.sample_rate != reference_rate {
            warnings.push(format!(
                "sample rate is {} Hz but the server expects {} Hz; audio is sent as-is",
                self.sample_rate, reference_rate
            ));
        }

        if self.channels != 1 {
            warnings.push(format!(
                "file has {} channels; samples are sent interleaved as if mono",
                self.channels
            ));
        }

        if self.audio_format != 1 || self.bits_per_sample != 16 {
            warnings.push(format!(
                "expected 16-bit PCM (format 1), found format {} with {} bits per sample",
                self.audio_format, self.bits_per_sample
            ));
        }

        warnings
    }
}

/// Look up the `fmt ` chunk without failing.
///
/// Returns `None` when the header is invalid, the chunk is absent or shorter
/// than 16 bytes, or a chunk before it is truncated.
pub fn probe_format(buffer: &[u8]) -> Option<FormatInfo> {
    chunks(buffer)
        .ok()?
        .map_while(Result::ok)
        .find(|chunk| &chunk.tag == FMT_TAG)
        .and_then(|chunk| FormatInfo::parse(chunk.payload))
}
