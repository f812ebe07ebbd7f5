use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rate of the PCMU (G.711 µ-law) stream exchanged with the realtime endpoint.
pub const PCMU_SAMPLE_RATE: f64 = 8000.0;

/// One RTP packet worth of audio.
pub const FRAME_DURATION_MS: u64 = 20;

/// Samples per 20 ms frame at 8 kHz.
pub const PCMU_FRAME_SAMPLES: usize = 160;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Input frames covering one 20 ms packet at `sample_rate`.
pub fn frame_len(sample_rate: u32) -> usize {
    (sample_rate as u64 * FRAME_DURATION_MS / 1000) as usize
}

/// Feeds a mono resampler with arbitrarily sized input.
///
/// Samples are buffered until a full input chunk is available, so callers can
/// push whatever the device or network hands them.
pub struct ChunkedResampler {
    resampler: FastFixedIn<f32>,
    pending: Vec<f32>,
}

impl ChunkedResampler {
    pub fn new(in_sampling_rate: f64, out_sampling_rate: f64, chunk_size: usize) -> anyhow::Result<Self> {
        Ok(Self {
            resampler: create_resampler(in_sampling_rate, out_sampling_rate, chunk_size)?,
            pending: Vec::with_capacity(chunk_size * 2),
        })
    }

    /// Appends `input` and returns every sample produced so far.
    pub fn push(&mut self, input: &[f32]) -> anyhow::Result<Vec<f32>> {
        self.pending.extend_from_slice(input);
        let mut output = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let mut processed = self.resampler.process(&[chunk], None)?;
            if let Some(channel) = processed.pop() {
                output.extend(channel);
            }
        }
        Ok(output)
    }
}

/// Averages interleaved frames down to one channel.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// G.711 µ-law compression of one linear sample.
pub fn mulaw_encode_sample(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    pcm = pcm.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) | mantissa) as u8
}

/// G.711 µ-law expansion of one code byte.
pub fn mulaw_decode_sample(code: u8) -> i16 {
    let code = !code;
    let sign = code & 0x80;
    let exponent = ((code >> 4) & 0x07) as i32;
    let mantissa = (code & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encodes f32 samples in [-1, 1] as a PCMU payload.
pub fn encode_pcmu(pcm32: &[f32]) -> Vec<u8> {
    convert_f32_to_i16(pcm32)
        .into_iter()
        .map(mulaw_encode_sample)
        .collect()
}

/// Decodes a PCMU payload into f32 samples.
pub fn decode_pcmu(payload: &[u8]) -> Vec<f32> {
    let pcm16: Vec<i16> = payload.iter().map(|&b| mulaw_decode_sample(b)).collect();
    convert_i16_to_f32(&pcm16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(48000.0, PCMU_SAMPLE_RATE, 960).is_ok());
        assert!(create_resampler(PCMU_SAMPLE_RATE, 44100.0, 160).is_ok());
        assert!(create_resampler(8000.0, 8000.0, 160).is_ok());
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(frame_len(8000), PCMU_FRAME_SAMPLES);
        assert_eq!(frame_len(48000), 960);
        assert_eq!(frame_len(44100), 882);
    }

    #[test]
    fn test_chunked_resampler_buffers_partial_input() {
        let mut resampler = ChunkedResampler::new(48000.0, PCMU_SAMPLE_RATE, 960).unwrap();

        let out = resampler.push(&[0.0; 500]).unwrap();
        assert!(out.is_empty());

        let out = resampler.push(&[0.0; 500]).unwrap();
        assert!(!out.is_empty());
        // One 960-sample chunk at 48 kHz is about 160 samples at 8 kHz.
        assert!(out.len() <= 200);
    }

    #[test]
    fn test_downmix_to_mono() {
        let stereo = [0.5f32, -0.5, 1.0, 0.0];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert_abs_diff_eq!(mono[0], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(mono[1], 0.5, epsilon = 0.0001);

        assert_eq!(downmix_to_mono(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[test]
    fn test_convert_f32_to_i16_clamps() {
        let result = convert_f32_to_i16(&[1.0, -1.0, 0.0, 2.0, -2.0]);
        assert_eq!(result, vec![i16::MAX, -32767, 0, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_mulaw_known_codes() {
        // Silence maps to 0xFF in G.711.
        assert_eq!(mulaw_encode_sample(0), 0xFF);
        assert_eq!(mulaw_decode_sample(0xFF), 0);
        assert_eq!(mulaw_decode_sample(0x7F), 0);
        // Full-scale codes.
        assert_eq!(mulaw_encode_sample(i16::MAX), 0x80);
        assert_eq!(mulaw_encode_sample(i16::MIN), 0x00);
        assert_eq!(mulaw_decode_sample(0x80), 32124);
        assert_eq!(mulaw_decode_sample(0x00), -32124);
    }

    #[test]
    fn test_mulaw_preserves_sign_and_magnitude() {
        for sample in [100i16, 1000, 5000, 20000, -100, -1000, -5000, -20000] {
            let decoded = mulaw_decode_sample(mulaw_encode_sample(sample));
            assert_eq!(decoded.signum(), sample.signum());
            let error = (decoded as i32 - sample as i32).abs();
            // Quantization step grows with magnitude; stay within ~6%.
            assert!(error <= (sample as i32).abs() / 16 + 8, "{} -> {}", sample, decoded);
        }
    }

    #[test]
    fn test_pcmu_payload_helpers() {
        let payload = encode_pcmu(&[0.0, 0.5, -0.5]);
        assert_eq!(payload.len(), 3);
        assert_eq!(payload[0], 0xFF);

        let decoded = decode_pcmu(&payload);
        assert_abs_diff_eq!(decoded[0], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(decoded[1], 0.5, epsilon = 0.03);
        assert_abs_diff_eq!(decoded[2], -0.5, epsilon = 0.03);
    }
}
