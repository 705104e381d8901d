//! PCM16 sample conversion helpers.
//!
//! Negative and positive halves use different scales so that -1.0 maps to
//! -32768 and 1.0 maps to 32767 exactly.

/// Convert one float sample in [-1, 1] to a signed 16-bit sample.
pub fn float_to_int16(sample: f32) -> i16 {
    let scaled = if sample < 0.0 {
        (sample * 32768.0).round()
    } else {
        (sample * 32767.0).round()
    };
    // NaN survives the clamp and casts to 0
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Inverse of [`float_to_int16`].
pub fn int16_to_float(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32768.0
    } else {
        sample as f32 / 32767.0
    }
}

/// Convert float samples to little-endian PCM16 bytes in one pass.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&float_to_int16(sample).to_le_bytes());
    }
    bytes
}

/// Decode little-endian PCM16 bytes to float samples.
///
/// A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| int16_to_float(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Average interleaved channels down to mono.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Root-mean-square level of a frame, 0.0 for an empty frame.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
