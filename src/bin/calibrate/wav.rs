//! Reads and writes multichannel impulse responses with hound.

use crate::error::CalibrateError;
use brir_align::TransposableIter;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

/// The channels of a WAV file, as floats in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WavData {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f64>>,
}

impl WavData {
    /// Length of every channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }
}

/// Reads every channel of the WAV file at `path`. Integer samples are scaled
/// so that full scale is 1.
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<WavData, CalibrateError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<Vec<f64>, hound::Error>>()?,
        SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 / full_scale))
                .collect::<Result<Vec<f64>, hound::Error>>()?
        }
    };

    // frames of interleaved samples to one vector per channel
    let channels = samples
        .chunks(spec.channels as usize)
        .transpose()
        .map(|channel| channel.into_iter().copied().collect())
        .collect();

    Ok(WavData {
        sample_rate: spec.sample_rate,
        channels,
    })
}

/// Writes `channels` to a 32 bit float WAV file at `path`.
pub fn write_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: &[Vec<f64>],
) -> Result<(), CalibrateError> {
    let spec = WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;

    // interleave the channels
    for frame in channels.iter().transpose() {
        for sample in frame {
            writer.write_sample(*sample as f32)?;
        }
    }

    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir.wav");

        let channels = vec![vec![0.0, 0.5, -0.25, 1.0], vec![1.0, 0.0, 0.0, -0.125]];
        write_wav(&path, 48000, &channels).unwrap();

        let data = read_wav(&path).unwrap();
        assert_eq!(data.sample_rate, 48000);
        assert_eq!(data.len(), 4);
        assert_eq!(data.channels, channels);
    }

    #[test]
    fn int_samples_scaled_to_full_scale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("int.wav");

        let spec = WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for s in [16384i16, -32768, 0, 8192] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let data = read_wav(&path).unwrap();
        assert_eq!(data.channels, vec![vec![0.5, 0.0], vec![-1.0, 0.25]]);
    }

    #[test]
    fn missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let res = read_wav(dir.path().join("nothing.wav"));
        assert!(matches!(res, Err(CalibrateError::HoundError(_))));
    }
}
