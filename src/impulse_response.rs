//! A set of equal-length impulse responses, one per view azimuth.

use crate::error::{AlignError, Result};
use serde::{Deserialize, Serialize};

/// `N` impulse responses of length `L`, each measured at an azimuth in
/// degrees. The set is immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpulseResponseSet {
    samples: Vec<Vec<f64>>,
    azimuths: Vec<f64>,
}

impl ImpulseResponseSet {
    /// Builds a set, checking that there is at least one IR, that every IR
    /// has the same length and that there is one azimuth per IR.
    pub fn new(samples: Vec<Vec<f64>>, azimuths: Vec<f64>) -> Result<Self> {
        check_equal_lengths(&samples)?;
        if azimuths.len() != samples.len() {
            return Err(AlignError::CountMismatch {
                what: "azimuths",
                expected: samples.len(),
                found: azimuths.len(),
            });
        }
        Ok(Self { samples, azimuths })
    }

    /// Number of impulse responses.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Never true for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of every impulse response, in samples.
    pub fn ir_len(&self) -> usize {
        self.samples[0].len()
    }

    /// The IRs, in azimuth order as given.
    pub fn samples(&self) -> &[Vec<f64>] {
        &self.samples
    }

    /// View azimuth of each IR, in degrees.
    pub fn azimuths(&self) -> &[f64] {
        &self.azimuths
    }
}

/// Fails with [AlignError::EmptySet] or [AlignError::UnequalLengths] unless
/// `signals` is a non-empty set of equal-length signals.
pub fn check_equal_lengths(signals: &[Vec<f64>]) -> Result<usize> {
    let first = signals.first().ok_or(AlignError::EmptySet)?.len();
    match signals.iter().position(|s| s.len() != first) {
        Some(index) => Err(AlignError::UnequalLengths {
            index,
            expected: first,
            found: signals[index].len(),
        }),
        None => Ok(first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ragged_sets() {
        let res = ImpulseResponseSet::new(vec![vec![0.0; 4], vec![0.0; 3]], vec![0.0, 90.0]);
        assert_eq!(
            res,
            Err(AlignError::UnequalLengths {
                index: 1,
                expected: 4,
                found: 3
            })
        );
    }

    #[test]
    fn rejects_missing_azimuths() {
        let res = ImpulseResponseSet::new(vec![vec![0.0; 4]; 2], vec![0.0]);
        assert!(matches!(res, Err(AlignError::CountMismatch { .. })));
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(
            ImpulseResponseSet::new(vec![], vec![]),
            Err(AlignError::EmptySet)
        );
    }
}
