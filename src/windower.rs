//! Isolates the leading edge of each impulse response.
//!
//! Only the direct sound varies smoothly with view azimuth, so everything
//! after it is faded out before correlating, and the set is cropped to the
//! region around the onsets to keep the correlation cheap.

use crate::error::{AlignError, Result};
use crate::impulse_response::check_equal_lengths;

use log::debug;
use std::f64::consts::PI;
use std::ops::Range;

/// Window placement relative to each IR's onset, in samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Windower {
    /// the fade out starts this long after the onset
    pub rel_start: f64,
    /// the fade out ends this long after the onset
    pub rel_end: f64,
    /// samples kept before the earliest onset
    pub lead_in: f64,
}

/// A windowed, cropped copy of a set of IRs.
#[derive(Debug, Clone, PartialEq)]
pub struct Windowed {
    /// sample range of the original IRs that was kept
    pub range: Range<usize>,
    /// windowed IRs, cropped to `range`
    pub irs: Vec<Vec<f64>>,
}

/// One-sided raised cosine: 1 up to `start`, 0 from `end`, and a half cosine
/// in between.
pub fn raised_cosine(t: f64, start: f64, end: f64) -> f64 {
    let phase = if t <= start {
        0.0
    } else if t >= end {
        PI
    } else {
        PI * (t - start) / (end - start)
    };
    0.5 + 0.5 * phase.cos()
}

impl Windower {
    /// Window placement for IRs oversampled by `oversample`: fade from 2.5 to
    /// 5 samples (at the original rate) after the onset, keep 10 samples
    /// before the earliest onset.
    pub fn for_oversample(oversample: usize) -> Self {
        let osa = oversample as f64;
        Self {
            rel_start: 2.5 * osa,
            rel_end: 5.0 * osa,
            lead_in: 10.0 * osa,
        }
    }

    /// Weights of the window for an IR with onset `onset`, sampled at
    /// `time_axis`.
    pub fn weights(&self, time_axis: &[f64], onset: f64) -> Vec<f64> {
        let start = onset + self.rel_start;
        let end = onset + self.rel_end;
        time_axis
            .iter()
            .map(|&t| raised_cosine(t, start, end))
            .collect()
    }

    /// The part of an IR of length `len` covering every window plus the
    /// lead-in.
    pub fn crop_range(&self, onsets: &[f64], len: usize) -> Range<usize> {
        let min = onsets.iter().copied().fold(f64::INFINITY, f64::min);
        let max = onsets.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        // both ends truncated toward zero
        let start = (min - self.lead_in).max(0.0) as usize;
        let end = ((max + self.rel_end) as usize + 1).min(len);
        start.min(end)..end
    }

    /// Crops `irs` to [Windower::crop_range] and applies each IR's window.
    pub fn apply(&self, irs: &[Vec<f64>], onsets: &[f64]) -> Result<Windowed> {
        let len = check_equal_lengths(irs)?;
        if onsets.len() != irs.len() {
            return Err(AlignError::CountMismatch {
                what: "onsets",
                expected: irs.len(),
                found: onsets.len(),
            });
        }

        let range = self.crop_range(onsets, len);
        debug!("cropping impulse responses to samples {:?}", range);

        let time_axis: Vec<f64> = range.clone().map(|t| t as f64).collect();
        let irs = irs
            .iter()
            .zip(onsets)
            .map(|(ir, &onset)| {
                self.weights(&time_axis, onset)
                    .into_iter()
                    .zip(&ir[range.clone()])
                    .map(|(w, x)| w * x)
                    .collect()
            })
            .collect();

        Ok(Windowed { range, irs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_shape() {
        assert_eq!(raised_cosine(0.0, 2.0, 4.0), 1.0);
        assert_eq!(raised_cosine(2.0, 2.0, 4.0), 1.0);
        assert!((raised_cosine(3.0, 2.0, 4.0) - 0.5).abs() < 1e-12);
        assert!(raised_cosine(4.0, 2.0, 4.0).abs() < 1e-12);
        assert!(raised_cosine(10.0, 2.0, 4.0).abs() < 1e-12);
    }

    #[test]
    fn crop_covers_all_windows() {
        let w = Windower::for_oversample(1);
        assert_eq!(w.crop_range(&[20.0, 30.5], 100), 10..36);
        // clamped at both ends
        assert_eq!(w.crop_range(&[3.0, 98.0], 100), 0..100);
    }

    #[test]
    fn later_reflections_removed() {
        let mut ir = vec![0.0; 60];
        ir[20] = 1.0;
        ir[40] = 0.5;
        let w = Windower::for_oversample(1);
        let out = w.apply(&[ir], &[20.0]).unwrap();

        assert_eq!(out.range, 10..26);
        assert_eq!(out.irs[0].len(), 16);
        assert_eq!(out.irs[0][10], 1.0);
        assert!(out.irs[0].iter().all(|x| *x == 0.0 || *x == 1.0));
    }

    #[test]
    fn onset_count_checked() {
        let w = Windower::for_oversample(1);
        let res = w.apply(&[vec![0.0; 10]], &[1.0, 2.0]);
        assert!(matches!(res, Err(AlignError::CountMismatch { .. })));
    }
}
