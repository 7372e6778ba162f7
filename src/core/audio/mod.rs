//! Audio transcoding between the telephony leg and the agent leg.
//!
//! Telephony vendors deliver G.711 mu-law at 8 kHz; the voice-AI engine
//! speaks 16-bit linear PCM at 16 kHz. Both directions are converted here:
//! decode + upsample on the way in, decimate + encode on the way out.
//!
//! All functions are allocation-per-call, stateless, and infallible on any
//! input length; conversion problems are the caller's to degrade gracefully
//! (pass-through), never to propagate.

/// Telephony-side sample rate in Hz.
pub const PROVIDER_SAMPLE_RATE: u32 = 8_000;

/// Agent-side sample rate in Hz.
pub const AGENT_SAMPLE_RATE: u32 = 16_000;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32_635;

/// Encode one 16-bit linear sample as G.711 mu-law.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let magnitude = (sample as i32).abs().min(MULAW_CLIP) + MULAW_BIAS;

    // Position of the segment: highest set bit above the mantissa window.
    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode one G.711 mu-law byte to a 16-bit linear sample.
pub fn mulaw_to_linear(byte: u8) -> i16 {
    let b = !byte;
    let sign = b & 0x80;
    let exponent = (b >> 4) & 0x07;
    let mantissa = (b & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -(magnitude as i16)
    } else {
        magnitude as i16
    }
}

/// Decode a mu-law frame into linear samples.
pub fn decode_mulaw(frame: &[u8]) -> Vec<i16> {
    frame.iter().map(|&b| mulaw_to_linear(b)).collect()
}

/// Encode linear samples into a mu-law frame.
pub fn encode_mulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| linear_to_mulaw(s)).collect()
}

/// Upsample 8 kHz -> 16 kHz by inserting a linearly interpolated sample
/// between each adjacent pair. Output is exactly twice the input length.
pub fn upsample_2x(samples: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for (i, &sample) in samples.iter().enumerate() {
        out.push(sample);
        let next = samples.get(i + 1).copied().unwrap_or(sample);
        out.push(((sample as i32 + next as i32) / 2) as i16);
    }
    out
}

/// Downsample 16 kHz -> 8 kHz by decimation. Output is exactly half the
/// input length (rounded up for odd inputs).
pub fn downsample_2x(samples: &[i16]) -> Vec<i16> {
    samples.iter().copied().step_by(2).collect()
}

/// Reinterpret little-endian PCM bytes as samples. A trailing odd byte is
/// dropped.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serialize samples as little-endian PCM bytes.
pub fn samples_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Full inbound conversion: provider mu-law 8 kHz frame -> agent PCM16
/// 16 kHz bytes.
pub fn provider_to_agent(frame: &[u8]) -> Vec<u8> {
    samples_to_pcm_bytes(&upsample_2x(&decode_mulaw(frame)))
}

/// Full outbound conversion: agent PCM16 16 kHz bytes -> provider mu-law
/// 8 kHz frame.
pub fn agent_to_provider(bytes: &[u8]) -> Vec<u8> {
    encode_mulaw(&downsample_2x(&pcm_bytes_to_samples(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Width of the mu-law quantization step the sample falls in.
    fn quantization_step(sample: i16) -> i32 {
        let magnitude = (sample as i32).abs().min(MULAW_CLIP) + MULAW_BIAS;
        let mut exponent = 7;
        let mut mask = 0x4000;
        while exponent > 0 && magnitude & mask == 0 {
            exponent -= 1;
            mask >>= 1;
        }
        8 << exponent
    }

    #[test]
    fn test_mulaw_round_trip_within_one_step() {
        for &sample in &[0i16, 1, -1, 100, -100, 1000, -1000, 8000, -8000, 30000, -30000] {
            let decoded = mulaw_to_linear(linear_to_mulaw(sample));
            let error = (decoded as i32 - sample as i32).abs();
            assert!(
                error <= quantization_step(sample),
                "sample {sample} decoded to {decoded}, error {error} exceeds one step"
            );
        }
    }

    #[test]
    fn test_mulaw_silence() {
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(mulaw_to_linear(0xFF), 0);
    }

    #[test]
    fn test_mulaw_sign_symmetry() {
        for &sample in &[50i16, 500, 5000, 25000] {
            let pos = mulaw_to_linear(linear_to_mulaw(sample));
            let neg = mulaw_to_linear(linear_to_mulaw(-sample));
            assert_eq!(pos, -neg);
        }
    }

    #[test]
    fn test_upsample_doubles_sample_count() {
        let input = vec![0i16, 100, 200, 300];
        let output = upsample_2x(&input);
        assert_eq!(output.len(), input.len() * 2);
        // Original samples survive at even positions.
        assert_eq!(output[0], 0);
        assert_eq!(output[2], 100);
        assert_eq!(output[4], 200);
        // Interpolated midpoints between neighbors.
        assert_eq!(output[1], 50);
        assert_eq!(output[3], 150);
        // Final sample is duplicated, not extrapolated.
        assert_eq!(output[7], 300);
    }

    #[test]
    fn test_downsample_halves_sample_count() {
        let input: Vec<i16> = (0..160).collect();
        let output = downsample_2x(&input);
        assert_eq!(output.len(), 80);
        assert_eq!(output[0], 0);
        assert_eq!(output[1], 2);
        assert_eq!(output[79], 158);
    }

    #[test]
    fn test_resample_round_trip_lengths() {
        let input: Vec<i16> = (0..80).map(|i| (i * 13) as i16).collect();
        assert_eq!(downsample_2x(&upsample_2x(&input)), input);
    }

    #[test]
    fn test_pcm_byte_conversions() {
        let samples = vec![0i16, 1, -1, 32767, -32768];
        let bytes = samples_to_pcm_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);
        assert_eq!(pcm_bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn test_pcm_bytes_drops_trailing_odd_byte() {
        assert_eq!(pcm_bytes_to_samples(&[0x01, 0x00, 0xFF]), vec![1]);
    }

    #[test]
    fn test_full_direction_conversions() {
        // 20 ms of telephony audio: 160 mu-law bytes -> 320 samples -> 640 bytes.
        let frame = vec![0xFFu8; 160];
        let agent_bytes = provider_to_agent(&frame);
        assert_eq!(agent_bytes.len(), 640);

        let back = agent_to_provider(&agent_bytes);
        assert_eq!(back.len(), 160);
    }
}
