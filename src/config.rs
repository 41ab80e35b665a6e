//! Tunables for a calibration run, read from and written to RON.
//!
//! Every field has a default, so a config file only needs to name the values
//! it changes:
//!
//! ```ron
//! (
//!     oversample: 4,
//!     fit: (degree: 4, smooth_wrap: true),
//!     schedule: Auto(steps: 20000),
//! )
//! ```

use crate::annealer::{AnnealSchedule, AnnealerConfig};
use crate::curve_fitter::CurveFitter;
use crate::delay_estimator::{DelayEstimator, EnergyIntegral, ThresholdPeak};
use crate::error::{AlignError, Result};
use crate::windower::Windower;

use serde::{Deserialize, Serialize};

/// Which [DelayEstimator] to seed the alignment with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimatorStrategy {
    /// [ThresholdPeak]
    ThresholdPeak,
    /// [EnergyIntegral]
    EnergyIntegral,
}

/// Settings for the first onset estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// which estimator to use
    pub strategy: EstimatorStrategy,
    /// Relative peak threshold. Defaults to 0.7 for
    /// [EstimatorStrategy::ThresholdPeak] and 0.1 for the peak that bounds
    /// the [EstimatorStrategy::EnergyIntegral] window.
    pub rel_thresh: Option<f64>,
    /// Energy window length past the threshold peak, per unit of oversampling.
    pub guard_per_oversample: usize,
    /// Fraction of the windowed energy that marks the onset.
    pub energy_thresh: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            strategy: EstimatorStrategy::EnergyIntegral,
            rel_thresh: None,
            guard_per_oversample: 145,
            energy_thresh: 0.01,
        }
    }
}

impl EstimatorConfig {
    /// The configured estimator, for IRs oversampled by `oversample`.
    pub fn build(&self, oversample: usize) -> Box<dyn DelayEstimator + Send + Sync> {
        match self.strategy {
            EstimatorStrategy::ThresholdPeak => Box::new(
                self.rel_thresh
                    .map(ThresholdPeak::new)
                    .unwrap_or_default(),
            ),
            EstimatorStrategy::EnergyIntegral => {
                let mut est = EnergyIntegral::new(oversample);
                if let Some(rel_thresh) = self.rel_thresh {
                    est.peak = ThresholdPeak::new(rel_thresh);
                }
                est.guard = self.guard_per_oversample * oversample;
                est.energy_thresh = self.energy_thresh;
                Box::new(est)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(t) = self.rel_thresh {
            if !(t > 0.0 && t <= 1.0) {
                return Err(AlignError::InvalidConfig(format!(
                    "rel_thresh must be in (0, 1], got {}",
                    t
                )));
            }
        }
        if !(self.energy_thresh > 0.0 && self.energy_thresh < 1.0) {
            return Err(AlignError::InvalidConfig(format!(
                "energy_thresh must be in (0, 1), got {}",
                self.energy_thresh
            )));
        }
        Ok(())
    }
}

/// Polynomial fit of delay against azimuth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// polynomial degree, at least 1
    pub degree: usize,
    /// Also match the first derivative across the wrap point. Usually wanted
    /// for sources above the horizontal plane.
    pub smooth_wrap: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            degree: 6,
            smooth_wrap: false,
        }
    }
}

impl FitConfig {
    /// The fitter for one side of the data.
    pub fn fitter(&self, below: bool) -> Result<CurveFitter> {
        CurveFitter::new(self.degree, below, self.smooth_wrap)
    }
}

/// Window placement, in samples at the original rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// fade out start after the onset
    pub start_per_oversample: f64,
    /// fade out end after the onset
    pub end_per_oversample: f64,
    /// kept before the earliest onset
    pub lead_in_per_oversample: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            start_per_oversample: 2.5,
            end_per_oversample: 5.0,
            lead_in_per_oversample: 10.0,
        }
    }
}

impl WindowConfig {
    /// The windower for IRs oversampled by `oversample`.
    pub fn windower(&self, oversample: usize) -> Windower {
        let osa = oversample as f64;
        Windower {
            rel_start: self.start_per_oversample * osa,
            rel_end: self.end_per_oversample * osa,
            lead_in: self.lead_in_per_oversample * osa,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.start_per_oversample >= 0.0
            && self.end_per_oversample > self.start_per_oversample
            && self.lead_in_per_oversample >= 0.0)
        {
            return Err(AlignError::InvalidConfig(
                "window needs 0 <= start < end and lead_in >= 0".into(),
            ));
        }
        Ok(())
    }
}

/// Where the annealing schedule comes from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScheduleConfig {
    /// Use this schedule as is.
    Fixed(AnnealSchedule),
    /// Temperatures found by [crate::annealer::Annealer::auto_schedule].
    Auto {
        /// steps of the real run
        steps: u64,
        /// steps at each trial temperature
        #[serde(default = "default_trial_steps")]
        trial_steps: u64,
        /// log records of the real run
        #[serde(default = "default_updates")]
        updates: u64,
    },
}

fn default_trial_steps() -> u64 {
    2000
}

fn default_updates() -> u64 {
    100
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig::Fixed(AnnealSchedule::default())
    }
}

/// Everything that controls a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Factor the IRs were (or will be) oversampled by before alignment.
    pub oversample: usize,
    /// Base seed for the annealers' random number generators.
    pub seed: u64,
    /// first onset estimates
    pub estimator: EstimatorConfig,
    /// both curve fits
    pub fit: FitConfig,
    /// windowing before correlation
    pub window: WindowConfig,
    /// annealer moves and energy
    pub annealer: AnnealerConfig,
    /// annealing temperatures
    pub schedule: ScheduleConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            oversample: 4,
            seed: 0,
            estimator: EstimatorConfig::default(),
            fit: FitConfig::default(),
            window: WindowConfig::default(),
            annealer: AnnealerConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl CalibrationConfig {
    /// Checks every section, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.oversample == 0 {
            return Err(AlignError::InvalidConfig("oversample must be at least 1".into()));
        }
        if self.fit.degree < 1 {
            return Err(AlignError::InvalidConfig("fit degree must be at least 1".into()));
        }
        self.estimator.validate()?;
        self.window.validate()?;
        self.annealer.validate()?;
        if let ScheduleConfig::Fixed(schedule) = &self.schedule {
            schedule.validate()?;
        }
        Ok(())
    }

    /// Parses a RON config; does not validate it.
    pub fn from_ron(s: &str) -> std::result::Result<Self, ron::de::SpannedError> {
        ron::from_str(s)
    }

    /// Pretty RON for this config.
    pub fn to_ron(&self) -> std::result::Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }
}
