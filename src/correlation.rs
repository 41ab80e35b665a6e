//! Pairwise cross-correlation of a set of impulse responses.
//!
//! Entry `(i, j, max_delay + l)` of a [CrossCorrelationTensor] is
//! `sum_n irs[j][n + l] * irs[i][n]`, so a peak at positive lag `l` means IR
//! `j` arrives `l` samples after IR `i`.

use crate::error::{AlignError, Result};
use crate::impulse_response::check_equal_lengths;
use crate::peaks::local_maxima;

use log::debug;

/// Correlation of every ordered pair of IRs over a symmetric range of lags.
///
/// The lag axis always has odd length `2 * max_delay + 1`; zero lag is at
/// index `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossCorrelationTensor {
    n: usize,
    width: usize,
    values: Vec<f64>,
}

impl CrossCorrelationTensor {
    /// Builds a tensor from nested `[n][n][width]` values.
    pub fn from_nested(values: Vec<Vec<Vec<f64>>>) -> Result<Self> {
        let n = values.len();
        if n == 0 {
            return Err(AlignError::EmptySet);
        }
        let width = values[0].first().map(|row| row.len()).unwrap_or(0);
        if width % 2 == 0 {
            return Err(AlignError::EvenCorrelationAxis(width));
        }

        let mut flat = Vec::with_capacity(n * n * width);
        for (i, rows) in values.into_iter().enumerate() {
            if rows.len() != n {
                return Err(AlignError::CountMismatch {
                    what: "correlation rows",
                    expected: n,
                    found: rows.len(),
                });
            }
            for row in rows {
                if row.len() != width {
                    return Err(AlignError::UnequalLengths {
                        index: i,
                        expected: width,
                        found: row.len(),
                    });
                }
                flat.extend(row);
            }
        }

        Ok(Self {
            n,
            width,
            values: flat,
        })
    }

    /// A tensor of zeros with the same shape as `self`.
    pub(crate) fn zeros_like(&self) -> Self {
        Self {
            n: self.n,
            width: self.width,
            values: vec![0.0; self.values.len()],
        }
    }

    /// Number of IRs.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Length of the lag axis.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Index of zero lag on the lag axis.
    pub fn zero_lag(&self) -> usize {
        self.width / 2
    }

    /// Correlation of pair `(i, j)` over all lags.
    pub fn row(&self, i: usize, j: usize) -> &[f64] {
        let start = (i * self.n + j) * self.width;
        &self.values[start..start + self.width]
    }

    pub(crate) fn row_mut(&mut self, i: usize, j: usize) -> &mut [f64] {
        let start = (i * self.n + j) * self.width;
        &mut self.values[start..start + self.width]
    }

    /// Correlation of pair `(i, j)` at lag axis index `k`.
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.values[(i * self.n + j) * self.width + k]
    }

    /// Largest correlation of pair `(i, j)` over all lags.
    pub fn row_max(&self, i: usize, j: usize) -> f64 {
        self.row(i, j)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Multiplies every lag of pair `(i, j)` by `weights[i][j]`.
    pub fn weighted(mut self, weights: &[Vec<f64>]) -> Result<Self> {
        if weights.len() != self.n || weights.iter().any(|w| w.len() != self.n) {
            return Err(AlignError::CountMismatch {
                what: "pair weights",
                expected: self.n,
                found: weights.len(),
            });
        }
        for (i, weight_row) in weights.iter().enumerate() {
            for (j, &w) in weight_row.iter().enumerate() {
                self.row_mut(i, j).iter_mut().for_each(|v| *v *= w);
            }
        }
        Ok(self)
    }
}

/// Linear cross-correlation of every ordered pair of `irs`, for lags in
/// `-max_delay..=max_delay`. Without `max_delay`, every lag with any overlap
/// is returned.
pub fn compute(irs: &[Vec<f64>], max_delay: Option<usize>) -> Result<CrossCorrelationTensor> {
    let len = check_equal_lengths(irs)?;
    let max_delay = max_delay.unwrap_or(len.saturating_sub(1));
    let n = irs.len();
    let width = 2 * max_delay + 1;

    debug!(
        "correlating {} impulse responses of length {} over {} lags",
        n, len, width
    );

    let mut values = Vec::with_capacity(n * n * width);
    for ir_i in irs {
        for ir_j in irs {
            values.extend((0..width).map(|k| {
                let lag = k as i64 - max_delay as i64;
                correlate_at(ir_i, ir_j, lag)
            }));
        }
    }

    Ok(CrossCorrelationTensor { n, width, values })
}

/// `sum_n b[n + lag] * a[n]` over the overlapping samples.
fn correlate_at(a: &[f64], b: &[f64], lag: i64) -> f64 {
    let len = a.len() as i64;
    let start = 0.max(-lag);
    let end = len.min(len - lag);
    if start >= end {
        return 0.0;
    }
    (start..end)
        .map(|n| a[n as usize] * b[(n + lag) as usize])
        .sum()
}

/// Divides pair `(i, j)` by the square root of the product of the peak
/// autocorrelations of `i` and `j`.
///
/// This is only exact when each IR's autocorrelation peaks at zero lag, which
/// is the case for untouched IRs but only approximately so for windowed or
/// cropped ones.
pub fn normalize(tensor: &CrossCorrelationTensor) -> Result<CrossCorrelationTensor> {
    let max_cc = (0..tensor.n)
        .map(|i| {
            let peak = tensor.row_max(i, i);
            if peak > 0.0 {
                Ok(peak.sqrt())
            } else {
                Err(AlignError::SilentResponse { index: i })
            }
        })
        .collect::<Result<Vec<f64>>>()?;

    let mut out = tensor.clone();
    for i in 0..tensor.n {
        for j in 0..tensor.n {
            let scale = 1.0 / (max_cc[i] * max_cc[j]);
            out.row_mut(i, j).iter_mut().for_each(|v| *v *= scale);
        }
    }
    Ok(out)
}

/// Local maxima of the lag axis for every pair, strongest first.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakTable {
    n: usize,
    peaks: Vec<Vec<usize>>,
}

impl PeakTable {
    /// Lag axis indices of the peaks of pair `(i, j)`, sorted by descending
    /// correlation. May be empty.
    pub fn get(&self, i: usize, j: usize) -> &[usize] {
        &self.peaks[i * self.n + j]
    }

    /// Pairs `(i, j)` with `i != j` that have at least one peak, in row
    /// order. A pair's autocorrelation peaks never count.
    pub fn linked_pairs(&self) -> Vec<(usize, usize)> {
        (0..self.n)
            .flat_map(|i| (0..self.n).map(move |j| (i, j)))
            .filter(|&(i, j)| i != j && !self.get(i, j).is_empty())
            .collect()
    }
}

/// Finds the peaks of every pair in `tensor`.
pub fn find_peaks(tensor: &CrossCorrelationTensor) -> PeakTable {
    let mut peaks = Vec::with_capacity(tensor.n * tensor.n);
    for i in 0..tensor.n {
        for j in 0..tensor.n {
            let row = tensor.row(i, j);
            let mut found = local_maxima(row);
            // stable, so equal peaks keep ascending lag order
            found.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
            peaks.push(found);
        }
    }
    PeakTable { n: tensor.n, peaks }
}

/// Pair weights `1 / (|azimuth_i - azimuth_j| + 20)`, favouring nearby
/// views. The distance is not wrapped around 360 degrees.
pub fn azimuth_weights(azimuths: &[f64]) -> Vec<Vec<f64>> {
    azimuths
        .iter()
        .map(|a| {
            azimuths
                .iter()
                .map(|b| 1.0 / ((a - b).abs() + 20.0))
                .collect()
        })
        .collect()
}
