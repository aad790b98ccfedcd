//! PCM helpers: WAV encode/decode, duration, and the volume envelope the
//! client uses for mouth sync.

use std::io::Cursor;

use anyhow::{Context, Result};

/// Envelope window length in milliseconds.
pub const SLICE_LENGTH_MS: u64 = 20;

/// Decoded mono PCM audio.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Total duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }

    /// Windowed RMS volume sequence with [`SLICE_LENGTH_MS`] windows,
    /// normalized so the loudest window is 1.0.
    pub fn volume_envelope(&self) -> Vec<f32> {
        let window = (self.sample_rate as u64 * SLICE_LENGTH_MS / 1000) as usize;
        if window == 0 || self.samples.is_empty() {
            return Vec::new();
        }

        let mut volumes: Vec<f32> = self
            .samples
            .chunks(window)
            .map(|chunk| {
                let energy: f32 = chunk.iter().map(|s| s * s).sum();
                (energy / chunk.len() as f32).sqrt()
            })
            .collect();

        let peak = volumes.iter().cloned().fold(0.0f32, f32::max);
        if peak > 0.0 {
            for v in &mut volumes {
                *v /= peak;
            }
        }
        volumes
    }
}

/// Decode a WAV byte buffer into mono f32 samples. Multi-channel input is
/// averaged down to mono.
pub fn decode_wav(data: &[u8]) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(data)).context("failed to parse WAV data")?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read float samples")?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<Vec<_>, _>>()
                .context("failed to read int samples")?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Encode mono f32 samples as 16-bit PCM WAV bytes.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("failed to create WAV writer")?;
        for sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(value).context("failed to write sample")?;
        }
        writer.finalize().context("failed to finalize WAV")?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(duration_ms: u64, sample_rate: u32) -> Vec<f32> {
        let count = (sample_rate as u64 * duration_ms / 1000) as usize;
        (0..count)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                0.5 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn wav_round_trip() {
        let samples = sine(100, 24000);
        let bytes = encode_wav(&samples, 24000).unwrap();
        let decoded = decode_wav(&bytes).unwrap();

        assert_eq!(decoded.sample_rate, 24000);
        assert_eq!(decoded.samples.len(), samples.len());
        // 16-bit quantization keeps values close.
        for (a, b) in decoded.samples.iter().zip(&samples) {
            assert!((a - b).abs() < 0.001);
        }
    }

    #[test]
    fn duration_is_measured() {
        let bytes = encode_wav(&sine(500, 24000), 24000).unwrap();
        let decoded = decode_wav(&bytes).unwrap();
        assert_eq!(decoded.duration_ms(), 500);
    }

    #[test]
    fn envelope_window_count() {
        let decoded = DecodedAudio {
            samples: sine(200, 24000),
            sample_rate: 24000,
        };
        // 200 ms / 20 ms = 10 windows.
        assert_eq!(decoded.volume_envelope().len(), 10);
    }

    #[test]
    fn envelope_is_normalized() {
        let decoded = DecodedAudio {
            samples: sine(200, 24000),
            sample_rate: 24000,
        };
        let envelope = decoded.volume_envelope();
        let peak = envelope.iter().cloned().fold(0.0f32, f32::max);
        assert!((peak - 1.0).abs() < f32::EPSILON);
        assert!(envelope.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn silence_has_zero_envelope() {
        let decoded = DecodedAudio {
            samples: vec![0.0; 24000],
            sample_rate: 24000,
        };
        assert!(decoded.volume_envelope().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn invalid_wav_is_an_error() {
        assert!(decode_wav(b"not a wav file").is_err());
    }
}
