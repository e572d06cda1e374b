//! Conversion between normalized `f32` samples and 16-bit PCM blobs.

use gemini_realtime::EncodedBlob;

/// Rate of the audio sent to the model.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Rate of the audio the model streams back.
pub const RESPONSE_SAMPLE_RATE: u32 = 24_000;
/// Samples per captured frame.
pub const CAPTURE_FRAME_LEN: usize = 4096;

const PCM_SCALE: f32 = 32768.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed audio frame: {len} bytes is not a whole number of {channels}-channel 16-bit samples")]
    MalformedFrame { len: usize, channels: u16 },
}

/// Encodes a mono frame at the input rate.
pub fn encode(frame: &[f32]) -> EncodedBlob {
    encode_with(frame, INPUT_SAMPLE_RATE, 1)
}

/// Clamps each sample to [-1, 1], quantizes it to i16 and packs it little-endian.
pub fn encode_with(samples: &[f32], sample_rate: u32, channels: u16) -> EncodedBlob {
    let data = samples
        .iter()
        .flat_map(|&sample| quantize(sample).to_le_bytes())
        .collect();
    EncodedBlob::new(data, sample_rate, channels)
}

/// Decodes interleaved samples, rejecting blobs that do not hold whole frames.
pub fn decode(blob: &EncodedBlob, channels: u16) -> Result<Vec<f32>, CodecError> {
    let frame_bytes = 2 * usize::from(channels);
    if frame_bytes == 0 || blob.data.len() % frame_bytes != 0 {
        return Err(CodecError::MalformedFrame {
            len: blob.data.len(),
            channels,
        });
    }
    Ok(blob
        .data
        .chunks_exact(2)
        .map(|chunk| f32::from(i16::from_le_bytes([chunk[0], chunk[1]])) / PCM_SCALE)
        .collect())
}

fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * PCM_SCALE)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}
