//! Aligns every IR of a measurement against every other.
//!
//! The per-view calibration in [crate::orchestrator] only fixes how the delay
//! of one source and ear changes as the listener turns. This pass finds the
//! delays between all the sources and ears, by annealing one correlation
//! tensor over all of them. When there are several views, the tensors of a
//! few sampled views are merged after undoing the per-view delay changes, so
//! the result holds for every view.

use crate::annealer::{AnnealLog, AnnealSchedule, Annealer, AnnealerConfig};
use crate::config::ScheduleConfig;
use crate::correlation::{compute, normalize, CrossCorrelationTensor};
use crate::error::{AlignError, Result};
use crate::impulse_response::check_equal_lengths;

use log::info;
use serde::{Deserialize, Serialize};

/// Number of views whose tensors are merged.
pub const SAMPLED_VIEWS: usize = 6;

/// Only the start of each IR is correlated.
const CORRELATION_LEN: usize = 5000;

/// Largest lag considered, per unit of oversampling.
const MAX_DELAY_PER_OVERSAMPLE: usize = 100;

/// Schedule used for the global pass unless one is configured.
pub fn default_schedule() -> AnnealSchedule {
    AnnealSchedule {
        t_max: 50.0,
        t_min: 0.00058,
        steps: 840000,
        updates: 100,
    }
}

/// Indices of `count` evenly spaced views out of `n_views`, starting with
/// the first.
pub fn view_samples(n_views: usize, count: usize) -> Vec<usize> {
    (0..count).map(|i| i * n_views / count).collect()
}

/// Normalised correlation tensor of the start of `irs`, which have been
/// oversampled by `oversample`.
pub fn view_tensor(irs: &[Vec<f64>], oversample: usize) -> Result<CrossCorrelationTensor> {
    let len = check_equal_lengths(irs)?.min(CORRELATION_LEN);
    let starts: Vec<Vec<f64>> = irs.iter().map(|ir| ir[..len].to_vec()).collect();
    normalize(&compute(&starts, Some(MAX_DELAY_PER_OVERSAMPLE * oversample))?)
}

/// Shifts the correlation of each pair `(i, j)` by `delays[j] - delays[i]`
/// (rounded) along the lag axis, filling with zeros. This is about the same
/// as delaying the IRs before correlating them.
pub fn shift_tensor(
    tensor: &CrossCorrelationTensor,
    delays: &[f64],
) -> Result<CrossCorrelationTensor> {
    let n = tensor.n();
    if delays.len() != n {
        return Err(AlignError::CountMismatch {
            what: "delays",
            expected: n,
            found: delays.len(),
        });
    }

    let width = tensor.width() as i64;
    let mut out = tensor.zeros_like();
    for i in 0..n {
        for j in 0..n {
            let shift = (delays[j] - delays[i]).round_ties_even() as i64;
            let src = tensor.row(i, j);
            for (k, v) in out.row_mut(i, j).iter_mut().enumerate() {
                let from = k as i64 - shift;
                if (0..width).contains(&from) {
                    *v = src[from as usize];
                }
            }
        }
    }
    Ok(out)
}

/// Averages the tensors of several views.
///
/// `view_delays[v][i]` is the calibrated delay of IR `i` at view `v`; each
/// view's tensor is shifted to undo the change in delay since the first
/// view before averaging.
pub fn merge_views(
    tensors: &[CrossCorrelationTensor],
    view_delays: &[Vec<f64>],
) -> Result<CrossCorrelationTensor> {
    let first = tensors.first().ok_or(AlignError::EmptySet)?;
    if view_delays.len() != tensors.len() {
        return Err(AlignError::CountMismatch {
            what: "view delays",
            expected: tensors.len(),
            found: view_delays.len(),
        });
    }

    let mut sum = first.zeros_like();
    for (tensor, delays) in tensors.iter().zip(view_delays) {
        if tensor.n() != first.n() || tensor.width() != first.width() {
            return Err(AlignError::CountMismatch {
                what: "correlation lags",
                expected: first.width(),
                found: tensor.width(),
            });
        }
        if delays.len() != first.n() {
            return Err(AlignError::CountMismatch {
                what: "delays",
                expected: first.n(),
                found: delays.len(),
            });
        }
        let undo: Vec<f64> = delays
            .iter()
            .zip(&view_delays[0])
            .map(|(d, d0)| d0 - d)
            .collect();
        let shifted = shift_tensor(tensor, &undo)?;
        for i in 0..first.n() {
            for j in 0..first.n() {
                sum.row_mut(i, j)
                    .iter_mut()
                    .zip(shifted.row(i, j))
                    .for_each(|(s, v)| *s += v);
            }
        }
    }

    let count = tensors.len() as f64;
    for i in 0..first.n() {
        for j in 0..first.n() {
            sum.row_mut(i, j).iter_mut().for_each(|s| *s /= count);
        }
    }
    Ok(sum)
}

/// Result of the global pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalAlignment {
    /// Delay of each IR relative to the earliest, in samples at the original
    /// rate.
    pub delays: Vec<f64>,
    /// schedule the annealer ran with
    pub schedule: AnnealSchedule,
    /// energy of the annealed delays
    pub best_energy: f64,
    /// annealing trace
    pub log: AnnealLog,
}

/// Anneals `tensor` from all-zero delays.
pub fn align_global(
    tensor: CrossCorrelationTensor,
    config: &AnnealerConfig,
    schedule: &ScheduleConfig,
    oversample: usize,
    seed: u64,
) -> Result<GlobalAlignment> {
    if oversample == 0 {
        return Err(AlignError::InvalidConfig("oversample must be at least 1".into()));
    }
    let mut annealer = Annealer::new(tensor, config, seed)?;
    let schedule = match *schedule {
        ScheduleConfig::Fixed(schedule) => schedule,
        ScheduleConfig::Auto {
            steps,
            trial_steps,
            updates,
        } => annealer.auto_schedule(steps, trial_steps, updates)?,
    };
    let outcome = annealer.anneal(&schedule)?;

    let min = outcome
        .best_state
        .iter()
        .copied()
        .min()
        .ok_or(AlignError::EmptySet)?;
    let delays: Vec<f64> = outcome
        .best_state
        .iter()
        .map(|&d| (d - min) as f64 / oversample as f64)
        .collect();
    info!("global delays {:?}", delays);

    Ok(GlobalAlignment {
        delays,
        schedule,
        best_energy: outcome.best_energy,
        log: outcome.log,
    })
}

/// Overall delay of each IR at each view, in samples at the original rate:
/// the global delay plus the change in the per-view delay since the first
/// view. `view_delays[v][i]` is in oversampled samples.
pub fn combine_delays(
    global: &[f64],
    view_delays: &[Vec<f64>],
    oversample: usize,
) -> Result<Vec<Vec<f64>>> {
    let first = view_delays.first().ok_or(AlignError::EmptySet)?;
    let osa = oversample as f64;
    view_delays
        .iter()
        .map(|delays| {
            if delays.len() != global.len() || first.len() != global.len() {
                return Err(AlignError::CountMismatch {
                    what: "view delays",
                    expected: global.len(),
                    found: delays.len(),
                });
            }
            Ok(global
                .iter()
                .zip(delays.iter().zip(first))
                .map(|(g, (d, d0))| g + (d - d0) / osa)
                .collect())
        })
        .collect()
}
