//! Band-limited resampling in the frequency domain.
//!
//! Calibration works on oversampled IRs so that delays can be found to a
//! fraction of a sample at the original rate. The signal is treated as
//! periodic: its spectrum is truncated or zero padded to the new length,
//! splitting or joining the Nyquist bin when the shorter length is even.

use crate::error::{AlignError, Result};

use rustfft::{num_complex::Complex, FftPlanner};

/// Resamples signals, reusing FFT plans between calls.
pub struct Resampler {
    planner: FftPlanner<f64>,
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Resampler {
    /// A resampler with an empty FFT plan cache.
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// `x` resampled to `num` samples.
    pub fn resample(&mut self, x: &[f64], num: usize) -> Result<Vec<f64>> {
        let nx = x.len();
        if nx == 0 || num == 0 {
            return Err(AlignError::EmptySet);
        }

        let mut spectrum: Vec<Complex<f64>> = x.iter().map(|&s| Complex::new(s, 0.0)).collect();
        self.planner.plan_fft_forward(nx).process(&mut spectrum);

        let n = nx.min(num);
        let nyq = n / 2 + 1;
        let mut out = vec![Complex::new(0.0, 0.0); num];

        // positive frequencies, including Nyquist if present
        out[..nyq].copy_from_slice(&spectrum[..nyq]);
        // negative frequencies
        let n_neg = n - nyq;
        out[num - n_neg..].copy_from_slice(&spectrum[nx - n_neg..]);

        if n % 2 == 0 {
            let half = n / 2;
            if num < nx {
                out[num - half] += spectrum[nx - half];
            } else if nx < num {
                out[half] *= 0.5;
                out[num - half] = out[half];
            }
        }

        self.planner.plan_fft_inverse(num).process(&mut out);

        // the inverse transform is unnormalised
        let scale = 1.0 / nx as f64;
        Ok(out.into_iter().map(|c| c.re * scale).collect())
    }

    /// Each signal resampled to `factor` times its length.
    pub fn oversample(&mut self, signals: &[Vec<f64>], factor: usize) -> Result<Vec<Vec<f64>>> {
        if factor == 0 {
            return Err(AlignError::InvalidConfig("oversample must be at least 1".into()));
        }
        signals
            .iter()
            .map(|s| self.resample(s, s.len() * factor))
            .collect()
    }
}
