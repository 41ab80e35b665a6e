//! Runs the whole delay calibration for one set of IRs.
//!
//! The IRs are those of one source and one ear, measured over a range of
//! listener view azimuths. The steps are:
//!
//! - estimate the onset of each IR with a [DelayEstimator];
//! - fit a smooth curve under those estimates, since they are only ever late;
//! - window out everything but a few samples after the fitted onsets;
//! - correlate the windowed IRs, weighting nearby views more heavily;
//! - anneal the integer delays to maximise the weighted correlation;
//! - refit a smooth curve through the annealed delays.
//!
//! [DelayEstimator]: crate::delay_estimator::DelayEstimator

use crate::annealer::{AnnealLog, AnnealSchedule, Annealer};
use crate::config::{CalibrationConfig, ScheduleConfig};
use crate::correlation::{azimuth_weights, compute, normalize};
use crate::error::{AlignError, Result};
use crate::impulse_response::ImpulseResponseSet;

use log::info;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Intermediate values of a calibration run, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// raw onset estimates
    pub estimate: Vec<usize>,
    /// lower envelope of the estimates
    pub smooth_estimate: Vec<f64>,
    /// annealed delays, shifted to line up with `smooth_estimate`
    pub annealed: Vec<i64>,
    /// samples of the IRs that were correlated
    pub crop: Range<usize>,
    /// schedule the annealer ran with
    pub schedule: AnnealSchedule,
    /// energy of the annealed delays
    pub best_energy: f64,
    /// annealing trace
    pub log: AnnealLog,
}

/// Output of a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    /// Smooth delay of each IR, in (oversampled) samples.
    pub final_delays: Vec<f64>,
    /// How the run got there.
    pub diagnostics: Diagnostics,
}

/// Sequences the calibration stages with one configuration.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: CalibrationConfig,
}

impl Orchestrator {
    /// Validates `config` and wraps it.
    pub fn new(config: CalibrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The validated configuration.
    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Calibrates `irs`, seeding the annealer with `seed`. Any failure of any
    /// stage fails the run.
    pub fn align(&self, irs: &ImpulseResponseSet, seed: u64) -> Result<AlignmentResult> {
        let config = &self.config;
        let osa = config.oversample;
        let azimuths = irs.azimuths();

        let estimator = config.estimator.build(osa);
        let estimate = estimator.estimate(irs.samples())?;
        info!("{} gave onsets {:?}", estimator, estimate);

        let estimate_f: Vec<f64> = estimate.iter().map(|&d| d as f64).collect();
        let smooth_estimate = config.fit.fitter(true)?.fit(&estimate_f, azimuths)?;

        let windowed = config
            .window
            .windower(osa)
            .apply(irs.samples(), &smooth_estimate)?;
        info!(
            "correlating samples {}..{} of {} impulse responses",
            windowed.range.start,
            windowed.range.end,
            irs.len()
        );

        let tensor = normalize(&compute(&windowed.irs, None)?)?.weighted(&azimuth_weights(azimuths))?;

        let mut annealer = Annealer::new(tensor, &config.annealer, seed)?;
        annealer.init_delays(&smooth_estimate)?;

        let schedule = match config.schedule {
            ScheduleConfig::Fixed(schedule) => schedule,
            ScheduleConfig::Auto {
                steps,
                trial_steps,
                updates,
            } => annealer.auto_schedule(steps, trial_steps, updates)?,
        };
        let outcome = annealer.anneal(&schedule)?;

        let annealed = line_up(&outcome.best_state, &smooth_estimate)?;
        let final_delays = config.fit.fitter(false)?.fit(
            &annealed.iter().map(|&d| d as f64).collect::<Vec<f64>>(),
            azimuths,
        )?;
        info!("final delays {:?}", final_delays);

        Ok(AlignmentResult {
            final_delays,
            diagnostics: Diagnostics {
                estimate,
                smooth_estimate,
                annealed,
                crop: windowed.range,
                schedule,
                best_energy: outcome.best_energy,
                log: outcome.log,
            },
        })
    }
}

/// Shifts `state` so its minimum is the rounded minimum of `reference`; the
/// annealer only determines delays up to a constant.
fn line_up(state: &[i64], reference: &[f64]) -> Result<Vec<i64>> {
    let state_min = state.iter().copied().min().ok_or(AlignError::EmptySet)?;
    let reference_min = reference
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min)
        .round_ties_even() as i64;
    Ok(state.iter().map(|d| d - (state_min - reference_min)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EstimatorStrategy;

    const BURST: [f64; 4] = [1.0, -0.6, 0.3, -0.1];

    fn true_delay(azimuth: f64) -> i64 {
        (100.0 + 10.0 * azimuth.to_radians().cos()).round() as i64
    }

    fn bursts(azimuths: &[f64]) -> ImpulseResponseSet {
        let samples = azimuths
            .iter()
            .map(|&az| {
                let mut ir = vec![0.0; 300];
                let d = true_delay(az) as usize;
                ir[d..d + BURST.len()].copy_from_slice(&BURST);
                ir
            })
            .collect();
        ImpulseResponseSet::new(samples, azimuths.to_vec()).unwrap()
    }

    fn quick_config() -> CalibrationConfig {
        CalibrationConfig {
            oversample: 1,
            schedule: ScheduleConfig::Fixed(AnnealSchedule {
                t_max: 0.5,
                t_min: 0.0005,
                steps: 20000,
                updates: 10,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn recovers_relative_delays() {
        let azimuths: Vec<f64> = (0..8).map(|i| i as f64 * 45.0).collect();
        let irs = bursts(&azimuths);
        let result = Orchestrator::new(quick_config())
            .unwrap()
            .align(&irs, 7)
            .unwrap();

        let diag = &result.diagnostics;
        let truth: Vec<i64> = azimuths.iter().map(|&az| true_delay(az)).collect();
        assert_eq!(diag.estimate, truth.iter().map(|&d| d as usize).collect::<Vec<_>>());
        assert!(diag
            .smooth_estimate
            .iter()
            .zip(&diag.estimate)
            .all(|(s, &e)| *s <= e as f64 + 1e-6));

        for (annealed, t) in diag.annealed.iter().zip(&truth) {
            assert_eq!(annealed - diag.annealed[0], t - truth[0]);
        }
        for (fitted, t) in result.final_delays.iter().zip(&truth) {
            let relative = fitted - result.final_delays[0];
            assert!((relative - (t - truth[0]) as f64).abs() < 1.0);
        }
        assert_eq!(diag.log.records().len(), 11);
    }

    #[test]
    fn stage_failure_aborts_run() {
        let azimuths = [0.0, 120.0, 240.0];
        let mut samples = bursts(&azimuths).samples().to_vec();
        samples[2] = vec![0.0; 300];
        let irs = ImpulseResponseSet::new(samples, azimuths.to_vec()).unwrap();

        let mut config = quick_config();
        config.estimator.strategy = EstimatorStrategy::ThresholdPeak;
        let result = Orchestrator::new(config).unwrap().align(&irs, 0);
        assert_eq!(result, Err(AlignError::NoPeakFound { index: 2 }));
    }

    #[test]
    fn invalid_config_rejected_up_front() {
        let config = CalibrationConfig {
            oversample: 0,
            ..Default::default()
        };
        assert!(Orchestrator::new(config).is_err());
    }

    #[test]
    fn line_up_matches_minimum() {
        assert_eq!(line_up(&[-3, 0, 2], &[10.5, 12.0, 11.0]).unwrap(), vec![10, 13, 15]);
        assert_eq!(line_up(&[5, 6], &[11.5, 12.0]).unwrap(), vec![12, 13]);
    }
}
