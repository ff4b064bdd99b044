//! Audio I/O utilities.

use crate::{Error, Result};
use ndarray::Array1;
use std::path::Path;

/// Sample rate used by Chatterbox models.
pub const SAMPLE_RATE: u32 = 24000;

fn collect_samples<T, I>(samples: I, scale: f32) -> Result<Vec<f32>>
where
    T: Into<f64>,
    I: Iterator<Item = hound::Result<T>>,
{
    samples
        .map(|s| s.map(|v| (v.into() / scale as f64) as f32))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Audio(format!("Failed to read samples: {}", e)))
}

/// Read a WAV file and return mono samples as f32 in range [-1, 1].
///
/// Converts from 16/24/32-bit integer or 32-bit float input and averages
/// multi-channel audio down to one channel.
pub fn read_wav(path: impl AsRef<Path>) -> Result<(Array1<f32>, u32)> {
    let path = path.as_ref();
    let reader = hound::WavReader::open(path)
        .map_err(|e| Error::Audio(format!("Failed to open '{}': {}", path.display(), e)))?;

    let spec = reader.spec();

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => collect_samples(reader.into_samples::<i16>(), 32768.0)?,
        (hound::SampleFormat::Int, 24) => {
            collect_samples(reader.into_samples::<i32>(), 8388608.0)?
        }
        (hound::SampleFormat::Int, 32) => {
            collect_samples(reader.into_samples::<i32>(), 2147483648.0)?
        }
        (hound::SampleFormat::Float, 32) => collect_samples(reader.into_samples::<f32>(), 1.0)?,
        _ => {
            return Err(Error::Audio(format!(
                "Unsupported format: {:?} {}bit",
                spec.sample_format, spec.bits_per_sample
            )))
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        samples
    };

    Ok((Array1::from_vec(samples), spec.sample_rate))
}

/// Write samples to a WAV file.
///
/// Samples should be f32 in range [-1, 1]; they are stored as-is in a
/// 32-bit float mono file.
pub fn write_wav(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| Error::Audio(format!("Failed to create '{}': {}", path.display(), e)))?;

    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| Error::Audio(format!("Failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| Error::Audio(format!("Failed to finalize WAV: {}", e)))?;

    Ok(())
}

/// Resample audio to target sample rate using linear interpolation.
pub fn resample_linear(samples: &[f32], from_sr: u32, to_sr: u32) -> Vec<f32> {
    if from_sr == to_sr {
        return samples.to_vec();
    }

    let ratio = to_sr as f64 / from_sr as f64;
    let output_len = (samples.len() as f64 * ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = match (samples.get(src_idx), samples.get(src_idx + 1)) {
            (Some(&a), Some(&b)) => a * (1.0 - frac) + b * frac,
            (Some(&a), None) => a,
            _ => 0.0,
        };

        output.push(sample);
    }

    output
}
