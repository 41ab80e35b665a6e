//! Cheap first guesses at the onset of each impulse response.
//!
//! These estimates are only ever used as a starting point: they tend to have
//! positive noise (picking a sample late), which the lower-envelope curve fit
//! in the orchestrator is designed to ignore.

use crate::error::{AlignError, Result};
use crate::peaks::local_maxima;

use log::debug;
use std::fmt;

/// A strategy for estimating a non-negative integer delay per IR.
pub trait DelayEstimator: fmt::Display {
    /// Estimates the onset of each of `irs`, in samples.
    fn estimate(&self, irs: &[Vec<f64>]) -> Result<Vec<usize>>;
}

/// Picks the first peak of the rectified IR that reaches `rel_thresh` times
/// the largest absolute sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPeak {
    /// fraction of the largest sample a peak must reach
    pub rel_thresh: f64,
}

impl ThresholdPeak {
    /// An estimator with the given relative threshold.
    pub fn new(rel_thresh: f64) -> Self {
        Self { rel_thresh }
    }

    fn estimate_one(&self, index: usize, ir: &[f64]) -> Result<usize> {
        let rectified: Vec<f64> = ir.iter().map(|x| x.abs()).collect();
        let height = self.rel_thresh * rectified.iter().copied().fold(0.0, f64::max);

        local_maxima(&rectified)
            .into_iter()
            .find(|&p| rectified[p] >= height)
            .ok_or(AlignError::NoPeakFound { index })
    }
}

impl Default for ThresholdPeak {
    fn default() -> Self {
        Self::new(0.7)
    }
}

impl DelayEstimator for ThresholdPeak {
    fn estimate(&self, irs: &[Vec<f64>]) -> Result<Vec<usize>> {
        irs.iter()
            .enumerate()
            .map(|(index, ir)| self.estimate_one(index, ir))
            .collect()
    }
}

impl fmt::Display for ThresholdPeak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThresholdPeak(rel_thresh={})", self.rel_thresh)
    }
}

/// Thresholds the cumulative energy of each IR.
///
/// A low-threshold [ThresholdPeak] estimate plus `guard` samples (about one
/// metre of travel) bounds a window over which the energy is integrated; the
/// result is the first sample where the integral, normalised to 1 at the end
/// of the window, exceeds `energy_thresh`. This is less sensitive to pre-echo
/// and noise than picking a single peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyIntegral {
    /// finds the peak that ends the window
    pub peak: ThresholdPeak,
    /// samples past that peak included in the window
    pub guard: usize,
    /// fraction of the window's energy that marks the onset
    pub energy_thresh: f64,
}

impl EnergyIntegral {
    /// `145 * oversample` samples of guard is about 1 m at 48 kHz.
    pub fn new(oversample: usize) -> Self {
        Self {
            peak: ThresholdPeak::new(0.1),
            guard: 145 * oversample,
            energy_thresh: 0.01,
        }
    }

    fn estimate_one(&self, ir: &[f64], from_thresh: usize) -> usize {
        let win_end = (from_thresh + self.guard).min(ir.len() - 1);

        let energy: Vec<f64> = ir[..=win_end]
            .iter()
            .scan(0.0, |acc, x| {
                *acc += x * x;
                Some(*acc)
            })
            .collect();
        let total = energy[win_end];

        // from_thresh is a non-zero sample inside the window, so total > 0
        energy
            .iter()
            .position(|e| e / total > self.energy_thresh)
            .unwrap_or(0)
    }
}

impl DelayEstimator for EnergyIntegral {
    fn estimate(&self, irs: &[Vec<f64>]) -> Result<Vec<usize>> {
        let from_thresh = self.peak.estimate(irs)?;
        let delays: Vec<usize> = irs
            .iter()
            .zip(from_thresh)
            .map(|(ir, from_thresh)| self.estimate_one(ir, from_thresh))
            .collect();
        debug!("{} estimated delays {:?}", self, delays);
        Ok(delays)
    }
}

impl fmt::Display for EnergyIntegral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EnergyIntegral(guard={}, energy_thresh={})",
            self.guard, self.energy_thresh
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(len: usize, at: usize) -> Vec<f64> {
        let mut v = vec![0.0; len];
        v[at] = 1.0;
        v
    }

    #[test]
    fn threshold_skips_small_peaks() {
        let mut ir = vec![0.0; 50];
        ir[5] = 0.2;
        ir[10] = -0.8;
        ir[20] = 1.0;
        assert_eq!(ThresholdPeak::new(0.7).estimate(&[ir.clone()]).unwrap(), vec![10]);
        assert_eq!(ThresholdPeak::new(0.1).estimate(&[ir.clone()]).unwrap(), vec![5]);
        assert_eq!(ThresholdPeak::new(0.9).estimate(&[ir]).unwrap(), vec![20]);
    }

    #[test]
    fn threshold_without_peak_fails() {
        let irs = vec![impulse(10, 3), vec![0.0; 10]];
        assert_eq!(
            ThresholdPeak::default().estimate(&irs),
            Err(AlignError::NoPeakFound { index: 1 })
        );
    }

    #[test]
    fn energy_integral_finds_lone_impulse() {
        for oversample in [1, 4] {
            let est = EnergyIntegral::new(oversample);
            let delays = est.estimate(&[impulse(3000, 1000)]).unwrap();
            assert!(delays[0] >= 1000);
            assert!(delays[0] <= 1000 + 145 * oversample);
        }
    }

    #[test]
    fn energy_integral_ignores_tiny_pre_echo() {
        let mut ir = impulse(400, 100);
        // below the 1% energy threshold
        ir[40] = 0.05;
        let delays = EnergyIntegral::new(1).estimate(&[ir]).unwrap();
        assert_eq!(delays, vec![100]);
    }

    #[test]
    fn energy_integral_window_clamped_to_ir() {
        let delays = EnergyIntegral::new(4).estimate(&[impulse(120, 100)]).unwrap();
        assert_eq!(delays, vec![100]);
    }
}
