//! 16-bit PCM conversion helpers.
//!
//! The realtime API speaks PCM 16-bit signed little-endian in both
//! directions. Capture produces `f32` samples in `[-1.0, 1.0]`; playback
//! consumes the same range. Both directions scale by `32767`, so a
//! round trip loses at most one quantisation step.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Samples per audio render quantum (one capture block).
pub const RENDER_QUANTUM: usize = 128;

/// Sample rate of audio produced by the realtime API.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Default rate requested from the microphone.
///
/// Matches the `pcm16` input format expected by the realtime API.
pub const DEFAULT_CAPTURE_SAMPLE_RATE: u32 = 24000;

/// Scale between normalised float samples and 16-bit integers.
const PCM16_SCALE: f32 = 32767.0;

/// Errors raised while decoding PCM payloads.
#[derive(Debug, Error)]
pub enum PcmError {
    /// Payload length is not a whole number of 16-bit samples
    #[error("PCM16 payload has odd length: {0} bytes")]
    OddLength(usize),

    /// Payload is not valid base64
    #[error("Invalid base64 audio: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Convert a float sample to PCM16 by scaling and truncating toward zero.
///
/// Out-of-range input saturates at the `i16` bounds.
#[inline]
pub fn float_to_pcm16(sample: f32) -> i16 {
    (sample * PCM16_SCALE) as i16
}

/// Convert a PCM16 sample back to a float in `[-1.0, 1.0]`.
#[inline]
pub fn pcm16_to_float(sample: i16) -> f32 {
    f32::from(sample) / PCM16_SCALE
}

/// Encode float samples as little-endian PCM16 bytes.
pub fn encode_block(samples: &[f32]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.put_i16_le(float_to_pcm16(sample));
    }
    out.freeze()
}

/// Decode little-endian PCM16 bytes into float samples.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, PcmError> {
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| pcm16_to_float(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}
