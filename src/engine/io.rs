//! WAV interchange
//!
//! Audio crosses the transform bridge as a WAV container: IEEE float 32-bit
//! mono on the way out, any common PCM/float layout on the way back (mixed to
//! mono and resampled to the channel rate). The same helpers back the CLI's
//! file import/export.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{ResonatorError, Result};

/// Decoded mono audio and the rate it was stored at
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

fn float_spec(channels: u16, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

fn wav_error(e: hound::Error) -> ResonatorError {
    match e {
        hound::Error::IoError(io) => ResonatorError::Io(io),
        other => ResonatorError::InvalidAudio {
            reason: other.to_string(),
            source: Some(Box::new(other)),
        },
    }
}

/// Encode mono samples as an IEEE float 32-bit WAV byte stream
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 4));
    {
        let mut writer = WavWriter::new(&mut cursor, float_spec(1, sample_rate)).map_err(wav_error)?;
        for &sample in samples {
            writer
                .write_sample(if sample.is_finite() { sample } else { 0.0 })
                .map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
    }
    Ok(cursor.into_inner())
}

/// Decode a WAV byte stream to mono f32
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    if bytes.len() < 44 {
        return Err(ResonatorError::InvalidAudio {
            reason: format!("WAV data too short ({} bytes)", bytes.len()),
            source: None,
        });
    }
    let reader = WavReader::new(Cursor::new(bytes)).map_err(wav_error)?;
    read_mono(reader)
}

/// Decode a WAV byte stream and bring it to `target_rate`
pub fn decode_wav_at(bytes: &[u8], target_rate: u32) -> Result<Vec<f32>> {
    let decoded = decode_wav(bytes)?;
    if decoded.sample_rate == target_rate || decoded.sample_rate == 0 {
        return Ok(decoded.samples);
    }
    Ok(resample_linear(
        &decoded.samples,
        target_rate as f64 / decoded.sample_rate as f64,
    ))
}

/// Read a WAV file as mono f32
pub fn read_wav_file(path: &Path) -> Result<DecodedAudio> {
    if !path.exists() {
        return Err(ResonatorError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", path.display()),
        )));
    }
    let reader = WavReader::open(path).map_err(wav_error)?;
    read_mono(reader)
}

/// Write interleaved float samples to a WAV file
pub fn write_wav_file(path: &Path, interleaved: &[f32], channels: u16, sample_rate: u32) -> Result<()> {
    if channels == 0 {
        return Err(ResonatorError::UnsupportedFormat {
            format: "0-channel audio".to_string(),
        });
    }
    let mut writer = WavWriter::create(path, float_spec(channels, sample_rate)).map_err(wav_error)?;
    for &sample in interleaved {
        writer
            .write_sample(if sample.is_finite() { sample } else { 0.0 })
            .map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn read_mono<R: std::io::Read>(reader: WavReader<R>) -> Result<DecodedAudio> {
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(ResonatorError::UnsupportedFormat {
            format: "0-channel audio".to_string(),
        });
    }

    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    Ok(DecodedAudio {
        samples: mix_to_mono(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let scale = match (sample_format, bits_per_sample) {
        (SampleFormat::Float, 32) => {
            return reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(wav_error)
        }
        (SampleFormat::Int, 8) => 128.0,
        (SampleFormat::Int, 16) => 32768.0,
        (SampleFormat::Int, 24) => 8388608.0,
        (SampleFormat::Int, 32) => 2147483648.0,
        (format, bits) => {
            return Err(ResonatorError::UnsupportedFormat {
                format: format!("{}-bit {:?} audio", bits, format),
            })
        }
    };

    // hound widens every integer depth to i32
    reader
        .samples::<i32>()
        .map(|s| s.map(|v| v as f32 / scale))
        .collect::<std::result::Result<Vec<f32>, _>>()
        .map_err(wav_error)
}

/// Average interleaved frames down to one channel
fn mix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear interpolation resampling
pub fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() || ratio <= 0.0 {
        return Vec::new();
    }

    let source_len = samples.len();
    let target_len = ((source_len as f64) * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(target_len);

    for i in 0..target_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < source_len {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else if src_idx < source_len {
            samples[src_idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    #[test]
    fn test_encode_header_is_riff_float() {
        let bytes = encode_wav(&[0.1, 0.2, 0.3], 48000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert!(bytes.len() >= 44 + 3 * 4);
    }

    #[test]
    fn test_decode_preserves_float_samples() {
        let samples = [0.0, 0.25, -0.5, 1.0, -1.0];
        let decoded = decode_wav(&encode_wav(&samples, 48000).unwrap()).unwrap();
        assert_eq!(decoded.sample_rate, 48000);
        assert_eq!(decoded.samples.len(), samples.len());
        for (a, b) in decoded.samples.iter().zip(samples.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_encode_replaces_non_finite() {
        let decoded = decode_wav(&encode_wav(&[f32::NAN, f32::INFINITY, 0.5], 48000).unwrap()).unwrap();
        assert_eq!(decoded.samples, vec![0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_decode_rejects_short_data() {
        let err = decode_wav(b"short").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_AUDIO");
    }

    #[test]
    fn test_decode_rejects_non_riff() {
        let mut bytes = b"NOT_RIFF".to_vec();
        bytes.extend_from_slice(&[0u8; 40]);
        assert!(decode_wav(&bytes).is_err());
    }

    #[test]
    fn test_decode_pcm16_stereo_mixes_to_mono() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..16 {
                writer.write_sample(16384i16).unwrap();
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let decoded = decode_wav(&cursor.into_inner()).unwrap();
        assert_eq!(decoded.sample_rate, 44100);
        assert_eq!(decoded.samples.len(), 16);
        assert_abs_diff_eq!(decoded.samples[0], 0.25, epsilon = 1e-4);
    }

    #[test]
    fn test_decode_at_resamples() {
        let bytes = encode_wav(&vec![0.5; 24000], 24000).unwrap();
        let samples = decode_wav_at(&bytes, 48000).unwrap();
        assert_eq!(samples.len(), 48000);
        assert_abs_diff_eq!(samples[1000], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        write_wav_file(&path, &[0.1, -0.1, 0.2, -0.2], 2, 48000).unwrap();

        let decoded = read_wav_file(&path).unwrap();
        assert_eq!(decoded.samples.len(), 2);
        assert_abs_diff_eq!(decoded.samples[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_wav_file(Path::new("/nonexistent/file.wav")).unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
    }

    #[test]
    fn test_resample_linear_length() {
        let out = resample_linear(&[0.0, 1.0, 2.0, 3.0], 2.0);
        assert_eq!(out.len(), 8);
        assert_abs_diff_eq!(out[1], 0.5, epsilon = 1e-6);
    }
}
