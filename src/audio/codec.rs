//! # Audio Frame Codec
//!
//! Converts the raw bytes clients stream to us into the f32 samples the engine expects.
//!
//! ## Wire format:
//! - **Encoding**: signed 16-bit PCM, little-endian
//! - **Sample rate**: 16kHz
//! - **Channels**: mono
//!
//! Chunk boundaries carry no meaning: a sample may be split across two WebSocket frames, so
//! decoding always works on the concatenation of every chunk in the utterance.

use crate::error::{GatewayError, GatewayResult};
use byteorder::{ByteOrder, LittleEndian};
use std::io::Cursor;

/// Sample rate of all audio handled by the gateway.
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per 16-bit PCM sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Decode ordered PCM chunks into samples normalized to [-1.0, 1.0).
///
/// Fails with [`GatewayError::MalformedAudio`] when the total length is odd.
pub fn decode<C: AsRef<[u8]>>(chunks: &[C]) -> GatewayResult<Vec<f32>> {
    let total: usize = chunks.iter().map(|c| c.as_ref().len()).sum();
    if total % BYTES_PER_SAMPLE != 0 {
        return Err(GatewayError::MalformedAudio { len: total });
    }

    let mut bytes = Vec::with_capacity(total);
    for chunk in chunks {
        bytes.extend_from_slice(chunk.as_ref());
    }

    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| LittleEndian::read_i16(pair) as f32 / 32768.0)
        .collect())
}

/// Duration in seconds of `sample_count` samples at 16kHz.
pub fn duration_seconds(sample_count: usize) -> f64 {
    sample_count as f64 / SAMPLE_RATE as f64
}

/// Decode a WAV file holding 16-bit mono PCM at 16kHz.
pub fn decode_wav(bytes: &[u8]) -> GatewayResult<Vec<f32>> {
    let mut reader = Cursor::new(bytes);
    let (header, data) = wav::read(&mut reader)
        .map_err(|e| GatewayError::UnsupportedAudioFormat(format!("unreadable WAV: {}", e)))?;

    if header.channel_count != 1 {
        return Err(GatewayError::UnsupportedAudioFormat(format!(
            "expected mono audio, got {} channels",
            header.channel_count
        )));
    }
    if header.sampling_rate != SAMPLE_RATE {
        return Err(GatewayError::UnsupportedAudioFormat(format!(
            "expected {}Hz audio, got {}Hz",
            SAMPLE_RATE, header.sampling_rate
        )));
    }

    match data {
        wav::BitDepth::Sixteen(samples) => {
            Ok(samples.iter().map(|&s| s as f32 / 32768.0).collect())
        }
        _ => Err(GatewayError::UnsupportedAudioFormat(format!(
            "expected 16-bit samples, got {} bits",
            header.bits_per_sample
        ))),
    }
}

/// Whether `bytes` start with a RIFF/WAVE header.
pub fn looks_like_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}
