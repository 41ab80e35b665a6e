//! Simulated annealing over integer delay vectors.
//!
//! The state is one integer delay per IR. The energy is the negated sum of
//! the (weighted, normalised) cross-correlation of every pair at the lag
//! implied by the state, so lower is better. Moves either nudge one delay by
//! a sample or snap one IR directly onto a correlation peak against another.
//!
//! Each [Annealer] owns its random number generator, seeded at construction,
//! so runs are reproducible and independent annealers can run in parallel.

use crate::correlation::{find_peaks, CrossCorrelationTensor, PeakTable};
use crate::error::{AlignError, Result};

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};

/// Bound on each phase of the automatic schedule search.
const MAX_SEARCH_ROUNDS: usize = 200;

/// Temperature schedule for one annealing run.
///
/// The temperature decays geometrically from `t_max` to `t_min` over
/// `steps` steps. `updates` evenly spaced records are written to the log,
/// plus one for the initial state; 0 disables the log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnealSchedule {
    /// starting temperature
    pub t_max: f64,
    /// final temperature
    pub t_min: f64,
    /// number of moves
    pub steps: u64,
    /// number of log records after the initial one
    pub updates: u64,
}

impl AnnealSchedule {
    /// Checks `t_max > t_min > 0`.
    pub fn validate(&self) -> Result<()> {
        if !(self.t_min > 0.0 && self.t_max > self.t_min) {
            return Err(AlignError::InvalidConfig(format!(
                "schedule needs t_max > t_min > 0, got t_max={} t_min={}",
                self.t_max, self.t_min
            )));
        }
        Ok(())
    }
}

impl Default for AnnealSchedule {
    fn default() -> Self {
        Self {
            t_max: 5.4,
            t_min: 0.0017,
            steps: 90000,
            updates: 100,
        }
    }
}

/// Tunables for the move proposals and the energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealerConfig {
    /// Rate of the exponential distribution used to pick which peak to align
    /// to; smaller values make weaker peaks more likely.
    pub peak_choose_lambda: f64,
    /// Probability of nudging a delay rather than aligning to a peak.
    pub p_perturb: f64,
    /// Optional `n x n` penalty on `|delay_i - delay_j|`.
    pub difference_penalty: Option<Vec<Vec<f64>>>,
}

impl Default for AnnealerConfig {
    fn default() -> Self {
        Self {
            peak_choose_lambda: 1.0,
            p_perturb: 0.1,
            difference_penalty: None,
        }
    }
}

impl AnnealerConfig {
    /// Checks `peak_choose_lambda > 0` and `p_perturb` in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if !(self.peak_choose_lambda > 0.0 && self.peak_choose_lambda.is_finite()) {
            return Err(AlignError::InvalidConfig(
                "peak_choose_lambda must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.p_perturb) {
            return Err(AlignError::InvalidConfig(
                "p_perturb must be between 0 and 1".into(),
            ));
        }
        Ok(())
    }
}

/// One entry of the annealing log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnealRecord {
    /// number of moves made before this record
    pub step: u64,
    /// temperature at `step`
    pub temperature: f64,
    /// energy of the current state
    pub energy: f64,
    /// lowest energy seen so far
    pub best_energy: f64,
    /// fraction of moves accepted since the previous record
    pub acceptance: Option<f64>,
    /// fraction of moves that lowered the energy since the previous record
    pub improvement: Option<f64>,
}

/// Diagnostic trace of an annealing run. Records are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnealLog {
    records: Vec<AnnealRecord>,
}

impl AnnealLog {
    fn push(&mut self, record: AnnealRecord) {
        debug!(
            "step {:>8}  T {:>10.5}  E {:>12.6}  best {:>12.6}  accept {:?}  improve {:?}",
            record.step,
            record.temperature,
            record.energy,
            record.best_energy,
            record.acceptance,
            record.improvement
        );
        self.records.push(record);
    }

    /// Records in the order they were written.
    pub fn records(&self) -> &[AnnealRecord] {
        &self.records
    }
}

/// What an annealing run hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnealOutcome {
    /// lowest-energy state seen
    pub best_state: Vec<i64>,
    /// energy of `best_state`
    pub best_energy: f64,
    /// trace of the run, as set by the schedule's `updates`
    pub log: AnnealLog,
}

/// A proposed change to one entry of the state, kept so it can be undone.
struct Move {
    index: usize,
    old: i64,
}

/// Aligns IRs by maximising the correlation between all pairs.
pub struct Annealer {
    tensor: CrossCorrelationTensor,
    peaks: PeakTable,
    peak_rank: Exp<f64>,
    p_perturb: f64,
    penalty: Option<Vec<Vec<f64>>>,
    // off-diagonal pairs with at least one peak; empty means only nudges
    linked: Vec<(usize, usize)>,
    state: Vec<i64>,
    rng: ChaCha8Rng,
}

impl Annealer {
    /// An annealer over `tensor`, with its state at all zeros and its random
    /// number generator seeded from `seed`.
    pub fn new(tensor: CrossCorrelationTensor, config: &AnnealerConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let n = tensor.n();

        if let Some(penalty) = &config.difference_penalty {
            if penalty.len() != n || penalty.iter().any(|row| row.len() != n) {
                return Err(AlignError::CountMismatch {
                    what: "difference penalty rows",
                    expected: n,
                    found: penalty.len(),
                });
            }
        }

        let peak_rank = Exp::new(config.peak_choose_lambda)
            .map_err(|e| AlignError::InvalidConfig(format!("peak_choose_lambda: {}", e)))?;
        let peaks = find_peaks(&tensor);
        let linked = peaks.linked_pairs();
        if linked.is_empty() {
            debug!("no correlation peaks to align to; only perturbing delays");
        }

        Ok(Self {
            tensor,
            peaks,
            peak_rank,
            p_perturb: config.p_perturb,
            penalty: config.difference_penalty.clone(),
            linked,
            state: vec![0; n],
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Current delays.
    pub fn state(&self) -> &[i64] {
        &self.state
    }

    /// Replaces the state.
    pub fn set_state(&mut self, state: Vec<i64>) -> Result<()> {
        if state.len() != self.tensor.n() {
            return Err(AlignError::CountMismatch {
                what: "delays",
                expected: self.tensor.n(),
                found: state.len(),
            });
        }
        self.state = state;
        Ok(())
    }

    /// Sets the state to `delays`, rounded half to even.
    pub fn init_delays(&mut self, delays: &[f64]) -> Result<()> {
        self.set_state(delays.iter().map(|d| d.round_ties_even() as i64).collect())
    }

    /// Lag axis index for the delay difference `diff`, saturating at the ends
    /// of the axis.
    fn lag_index(&self, diff: i64) -> usize {
        let max = self.tensor.width() as i64 - 1;
        (diff + self.tensor.zero_lag() as i64).clamp(0, max) as usize
    }

    /// Energy of `state`: minus the summed correlation of every ordered pair,
    /// plus the difference penalty if there is one. Depends only on the
    /// differences between delays.
    pub fn energy(&self, state: &[i64]) -> f64 {
        let n = self.tensor.n();
        let mut total_cc = 0.0;
        let mut total_penalty = 0.0;
        for i in 0..n {
            for j in 0..n {
                total_cc += self.tensor.get(i, j, self.lag_index(state[j] - state[i]));
                if let Some(penalty) = &self.penalty {
                    total_penalty += (state[i] - state[j]).abs() as f64 * penalty[i][j];
                }
            }
        }
        total_penalty - total_cc
    }

    /// The part of the energy that depends on entry `k` of the state, with
    /// that entry set to `value`.
    fn energy_terms(&self, k: usize, value: i64) -> f64 {
        let mut e = 0.0;
        for (j, &other) in self.state.iter().enumerate() {
            if j == k {
                continue;
            }
            e -= self.tensor.get(k, j, self.lag_index(other - value));
            e -= self.tensor.get(j, k, self.lag_index(value - other));
            if let Some(penalty) = &self.penalty {
                e += (value - other).abs() as f64 * (penalty[k][j] + penalty[j][k]);
            }
        }
        e
    }

    /// Energy change caused by `mv`, which has already been applied.
    fn energy_change(&self, mv: &Move) -> f64 {
        let new = self.state[mv.index];
        if new == mv.old {
            return 0.0;
        }
        self.energy_terms(mv.index, new) - self.energy_terms(mv.index, mv.old)
    }

    /// For each pair, how far the correlation at the lag implied by `state`
    /// falls short of the pair's best correlation. For reporting only.
    pub fn residual(&self, state: &[i64]) -> Vec<Vec<f64>> {
        let n = self.tensor.n();
        (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| {
                        let achieved = self.tensor.get(i, j, self.lag_index(state[j] - state[i]));
                        self.tensor.row_max(i, j) - achieved
                    })
                    .collect()
            })
            .collect()
    }

    /// Proposes and applies a move. Peak moves draw their pair from the
    /// linked pairs, so pairs without peaks are never drawn.
    fn propose(&mut self) -> Move {
        if self.linked.is_empty() || self.rng.gen::<f64>() < self.p_perturb {
            let a = self.rng.gen_range(0..self.state.len());
            let old = self.state[a];
            self.state[a] += if self.rng.gen::<f64>() < 0.5 { 1 } else { -1 };
            return Move { index: a, old };
        }

        let (a, b) = self.linked[self.rng.gen_range(0..self.linked.len())];
        let peaks = self.peaks.get(a, b);
        let rank = (self.peak_rank.sample(&mut self.rng) as usize).min(peaks.len() - 1);
        let lag = peaks[rank] as i64 - self.tensor.zero_lag() as i64;

        let old = self.state[b];
        self.state[b] = self.state[a] + lag;
        Move { index: b, old }
    }

    /// Metropolis acceptance; undoes `mv` if it is rejected.
    fn accept(&mut self, mv: &Move, de: f64, t: f64) -> bool {
        if de > 0.0 && (-de / t).exp() < self.rng.gen::<f64>() {
            self.state[mv.index] = mv.old;
            false
        } else {
            true
        }
    }

    /// Runs the annealer from its current state and leaves it at the best
    /// state found.
    pub fn anneal(&mut self, schedule: &AnnealSchedule) -> Result<AnnealOutcome> {
        schedule.validate()?;
        let AnnealSchedule {
            t_max,
            t_min,
            steps,
            updates,
        } = *schedule;

        let t_factor = -(t_max / t_min).ln();
        let wavelength = steps as f64 / updates as f64;

        let mut energy = self.energy(&self.state);
        let mut best_state = self.state.clone();
        let mut best_energy = energy;
        let mut log = AnnealLog::default();

        let (mut trials, mut accepts, mut improves) = (0u64, 0u64, 0u64);

        if updates > 0 {
            log.push(AnnealRecord {
                step: 0,
                temperature: t_max,
                energy,
                best_energy,
                acceptance: None,
                improvement: None,
            });
        }

        for step in 1..=steps {
            let t = t_max * (t_factor * step as f64 / steps as f64).exp();
            let mv = self.propose();
            let de = self.energy_change(&mv);

            trials += 1;
            if self.accept(&mv, de, t) {
                accepts += 1;
                if de < 0.0 {
                    improves += 1;
                }
                energy += de;
                if energy < best_energy {
                    best_energy = energy;
                    best_state.clone_from(&self.state);
                }
            }

            if updates > 1
                && (step as f64 / wavelength).floor() > ((step - 1) as f64 / wavelength).floor()
            {
                log.push(AnnealRecord {
                    step,
                    temperature: t,
                    energy,
                    best_energy,
                    acceptance: Some(accepts as f64 / trials as f64),
                    improvement: Some(improves as f64 / trials as f64),
                });
                trials = 0;
                accepts = 0;
                improves = 0;
            }
        }

        info!(
            "annealed {} delays over {} steps, best energy {:.6}",
            self.state.len(),
            steps,
            best_energy
        );

        self.state.clone_from(&best_state);
        Ok(AnnealOutcome {
            best_state,
            best_energy,
            log,
        })
    }

    /// `trial_steps` moves at a fixed temperature, returning the acceptance
    /// and improvement rates.
    fn run_at(&mut self, t: f64, trial_steps: u64) -> (f64, f64) {
        let (mut accepts, mut improves) = (0u64, 0u64);
        for _ in 0..trial_steps {
            let mv = self.propose();
            let de = self.energy_change(&mv);
            if self.accept(&mv, de, t) {
                accepts += 1;
                if de < 0.0 {
                    improves += 1;
                }
            }
        }
        let trials = trial_steps.max(1) as f64;
        (accepts as f64 / trials, improves as f64 / trials)
    }

    /// Derives a schedule from the energy landscape around the current state.
    ///
    /// `t_max` is where about 98% of moves are accepted, `t_min` is where no
    /// move improves the energy any more. Each temperature is tried for
    /// `trial_steps` moves. The state is put back afterwards.
    pub fn auto_schedule(
        &mut self,
        steps: u64,
        trial_steps: u64,
        updates: u64,
    ) -> Result<AnnealSchedule> {
        let seed_state = self.state.clone();

        // initial guess from the first move that changes anything
        let mut t = 0.0;
        for _ in 0..MAX_SEARCH_ROUNDS * 10 {
            let mv = self.propose();
            t = self.energy_change(&mv).abs();
            if t > 0.0 {
                break;
            }
        }
        if t == 0.0 {
            self.state = seed_state;
            return Err(AlignError::InvalidConfig(
                "no move changes the energy; cannot derive a schedule".into(),
            ));
        }

        let (mut acceptance, mut improvement) = self.run_at(t, trial_steps);
        for _ in 0..MAX_SEARCH_ROUNDS {
            if acceptance <= 0.98 {
                break;
            }
            t = round_figures(t / 1.5, 2);
            (acceptance, improvement) = self.run_at(t, trial_steps);
        }
        for _ in 0..MAX_SEARCH_ROUNDS {
            if acceptance >= 0.98 {
                break;
            }
            t = round_figures(t * 1.5, 2);
            (acceptance, improvement) = self.run_at(t, trial_steps);
        }
        let t_max = t;

        for _ in 0..MAX_SEARCH_ROUNDS {
            if improvement <= 0.0 {
                break;
            }
            t = round_figures(t / 1.5, 2);
            (acceptance, improvement) = self.run_at(t, trial_steps);
        }
        let t_min = if t < t_max {
            t
        } else {
            round_figures(t_max / 1.5, 2)
        };

        self.state = seed_state;

        let schedule = AnnealSchedule {
            t_max,
            t_min,
            steps,
            updates,
        };
        info!(
            "automatic schedule: t_max {} t_min {} (last acceptance {:.3})",
            t_max, t_min, acceptance
        );
        schedule.validate()?;
        Ok(schedule)
    }
}

/// Rounds `x` to `figures` significant figures.
fn round_figures(x: f64, figures: i32) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    let digits = figures - x.abs().log10().floor() as i32 - 1;
    let f = 10f64.powi(digits);
    (x * f).round() / f
}
