//! Calibrates the delays of binaural impulse responses measured over a range
//! of listener view azimuths, and applies the results.
//!
//! ```text
//! calibrate --config tuning.ron views \
//!           --files    view_000.wav view_045.wav ... \
//!           --azimuths 0 45 ... \
//!           --out      delays.ron
//!
//! calibrate apply --results delays.ron \
//!                 --files   view_000.wav view_045.wav ... \
//!                 --out-dir aligned
//!
//! calibrate global --files       all_000.wav all_045.wav ... \
//!                  --view-delays per_view.ron \
//!                  --out         global.ron
//! ```
//!
//! For `views` and `apply`, each input file holds the IRs of one source at
//! one view, one channel per ear. For `global`, each file holds every source
//! and ear of one view. Logging is controlled with `RUST_LOG`.

mod args;
mod error;
mod wav;

use args::{CalibrateArgs, CommandTask};
use brir_align::{
    config::{CalibrationConfig, ScheduleConfig},
    delay_applier::apply_delays,
    global_alignment::{
        align_global, combine_delays, default_schedule, merge_views, view_samples, view_tensor,
        GlobalAlignment, SAMPLED_VIEWS,
    },
    impulse_response::ImpulseResponseSet,
    orchestrator::{AlignmentResult, Orchestrator},
    resample::Resampler,
    TransposableIter,
};
use error::CalibrateError;
use wav::{read_wav, write_wav, WavData};

use clap::Parser;
use log::{error, info};
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    thread,
};

/// Calibration results for every ear of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewResults {
    pub oversample: usize,
    pub sample_rate: u32,
    pub azimuths: Vec<f64>,
    /// one result per ear, with delays in oversampled samples
    pub ears: Vec<AlignmentResult>,
}

/// Delays between every channel of a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalResults {
    pub oversample: usize,
    pub sample_rate: u32,
    /// annealed delays of the channels at the first view
    pub global: GlobalAlignment,
    /// `[view][channel]` overall delays, in samples at the file rate
    pub overall: Vec<Vec<f64>>,
}

fn main() {
    env_logger::init();
    let args = CalibrateArgs::parse();

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: CalibrateArgs) -> Result<(), CalibrateError> {
    let config = match &args.config {
        Some(path) => CalibrationConfig::from_ron(&fs::read_to_string(path)?)?,
        None => CalibrationConfig::default(),
    };

    match args.command {
        CommandTask::Views(cmd) => {
            let results = calibrate_views(&cmd.filenames, &cmd.azimuths, config)?;
            write_results(&cmd.outfile, &results)?;
            info!("wrote results to {}", cmd.outfile.display());
        }
        CommandTask::Apply(cmd) => {
            let results = read_results(&cmd.results)?;
            apply_results(&results, &cmd.filenames, &cmd.out_dir)?;
        }
        CommandTask::Global(cmd) => {
            let view_delays = cmd
                .view_delays
                .as_deref()
                .map(read_view_delays)
                .transpose()?;
            let results = calibrate_global(&cmd.filenames, view_delays, cmd.steps, config)?;
            write_results(&cmd.outfile, &results)?;
            info!("wrote results to {}", cmd.outfile.display());
        }
        CommandTask::DefaultConfig => println!("{}", CalibrationConfig::default().to_ron()?),
    }
    Ok(())
}

fn write_results<T: Serialize>(path: &Path, results: &T) -> Result<(), CalibrateError> {
    fs::write(path, ron::ser::to_string_pretty(results, PrettyConfig::default())?)?;
    Ok(())
}

fn read_results(path: &Path) -> Result<ViewResults, CalibrateError> {
    Ok(ron::from_str(&fs::read_to_string(path)?)?)
}

fn read_view_delays(path: &Path) -> Result<Vec<Vec<f64>>, CalibrateError> {
    Ok(ron::from_str(&fs::read_to_string(path)?)?)
}

/// Reads one file per view and checks that they agree on sample rate and
/// channel count.
fn read_views(filenames: &[PathBuf]) -> Result<Vec<WavData>, CalibrateError> {
    let views = filenames
        .iter()
        .map(read_wav)
        .collect::<Result<Vec<WavData>, CalibrateError>>()?;

    let first = views
        .first()
        .ok_or_else(|| CalibrateError::Mismatch("no input files".into()))?;
    if first.channels.is_empty() {
        return Err(CalibrateError::Mismatch(format!(
            "{} has no samples",
            filenames[0].display()
        )));
    }
    for (view, path) in views.iter().zip(filenames) {
        if view.sample_rate != first.sample_rate || view.channels.len() != first.channels.len() {
            return Err(CalibrateError::Mismatch(format!(
                "{} has {} channels at {} Hz, expected {} channels at {} Hz",
                path.display(),
                view.channels.len(),
                view.sample_rate,
                first.channels.len(),
                first.sample_rate
            )));
        }
    }
    Ok(views)
}

/// Runs the calibration for each ear on its own thread.
fn calibrate_views(
    filenames: &[PathBuf],
    azimuths: &[f64],
    config: CalibrationConfig,
) -> Result<ViewResults, CalibrateError> {
    if filenames.len() != azimuths.len() {
        return Err(CalibrateError::Mismatch(format!(
            "{} files but {} azimuths",
            filenames.len(),
            azimuths.len()
        )));
    }
    let orchestrator = Orchestrator::new(config)?;
    let oversample = orchestrator.config().oversample;
    let seed = orchestrator.config().seed;

    let views = read_views(filenames)?;
    let sample_rate = views[0].sample_rate;

    // [view][ear] to [ear][view]
    let per_ear: Vec<Vec<Vec<f64>>> = views.into_iter().map(|v| v.channels).transpose().collect();

    let ears = thread::scope(|s| {
        let handles: Vec<_> = per_ear
            .into_iter()
            .enumerate()
            .map(|(ear, irs)| {
                let orchestrator = &orchestrator;
                s.spawn(move || -> Result<AlignmentResult, CalibrateError> {
                    info!("calibrating ear {}", ear);
                    let irs = Resampler::new().oversample(&irs, oversample)?;
                    let set = ImpulseResponseSet::new(irs, azimuths.to_vec())?;
                    Ok(orchestrator.align(&set, seed + ear as u64)?)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| CalibrateError::JoinError).and_then(|r| r))
            .collect::<Result<Vec<AlignmentResult>, CalibrateError>>()
    })?;

    Ok(ViewResults {
        oversample,
        sample_rate,
        azimuths: azimuths.to_vec(),
        ears,
    })
}

/// Anneals the merged correlation of a few sampled views, then spreads the
/// result over every view with the per-view delays.
fn calibrate_global(
    filenames: &[PathBuf],
    view_delays: Option<Vec<Vec<f64>>>,
    steps: Option<u64>,
    config: CalibrationConfig,
) -> Result<GlobalResults, CalibrateError> {
    config.validate()?;
    let views = read_views(filenames)?;
    let n_channels = views[0].channels.len();

    let view_delays = match view_delays {
        Some(delays) => {
            if delays.len() != views.len() || delays.iter().any(|d| d.len() != n_channels) {
                return Err(CalibrateError::Mismatch(format!(
                    "view delays must cover {} views of {} channels",
                    views.len(),
                    n_channels
                )));
            }
            delays
        }
        None => vec![vec![0.0; n_channels]; views.len()],
    };

    let sampled = view_samples(views.len(), SAMPLED_VIEWS.min(views.len()));
    info!("correlating views {:?}", sampled);
    let mut resampler = Resampler::new();
    let tensors = sampled
        .iter()
        .map(|&v| {
            let irs = resampler.oversample(&views[v].channels, config.oversample)?;
            Ok(view_tensor(&irs, config.oversample)?)
        })
        .collect::<Result<Vec<_>, CalibrateError>>()?;
    let sampled_delays: Vec<Vec<f64>> = sampled.iter().map(|&v| view_delays[v].clone()).collect();
    let merged = merge_views(&tensors, &sampled_delays)?;

    let mut schedule = default_schedule();
    if let Some(steps) = steps {
        schedule.steps = steps;
    }
    let global = align_global(
        merged,
        &config.annealer,
        &ScheduleConfig::Fixed(schedule),
        config.oversample,
        config.seed,
    )?;
    let overall = combine_delays(&global.delays, &view_delays, config.oversample)?;

    Ok(GlobalResults {
        oversample: config.oversample,
        sample_rate: views[0].sample_rate,
        global,
        overall,
    })
}

/// Delay to add to each IR, as `[view][ear]` samples at the file rate, so
/// that every IR of an ear has its calibrated onset at the same time.
fn alignment_delays(results: &ViewResults) -> Vec<Vec<i64>> {
    let osa = results.oversample as f64;
    results
        .ears
        .iter()
        .map(|ear| {
            let latest = ear
                .final_delays
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            ear.final_delays
                .iter()
                .map(|d| ((latest - d) / osa).round_ties_even() as i64)
                .collect::<Vec<i64>>()
        })
        .transpose()
        .collect()
}

/// Writes a delayed copy of each file to `out_dir`. All outputs have the
/// same length.
fn apply_results(
    results: &ViewResults,
    filenames: &[PathBuf],
    out_dir: &Path,
) -> Result<(), CalibrateError> {
    if filenames.len() != results.azimuths.len() {
        return Err(CalibrateError::Mismatch(format!(
            "results cover {} views but {} files were given",
            results.azimuths.len(),
            filenames.len()
        )));
    }
    let views = read_views(filenames)?;
    if views[0].channels.len() != results.ears.len() {
        return Err(CalibrateError::Mismatch(format!(
            "results cover {} ears but the files have {} channels",
            results.ears.len(),
            views[0].channels.len()
        )));
    }

    let delays = alignment_delays(results);
    let out_len = views
        .iter()
        .zip(&delays)
        .map(|(view, d)| view.len() + d.iter().copied().max().unwrap_or(0) as usize)
        .max()
        .unwrap_or(0);

    fs::create_dir_all(out_dir)?;
    for ((view, d), path) in views.iter().zip(&delays).zip(filenames) {
        let aligned = apply_delays(&view.channels, d, 1, Some(out_len))?;
        let name = path.file_name().ok_or_else(|| {
            CalibrateError::Mismatch(format!("{} is not a file", path.display()))
        })?;
        write_wav(out_dir.join(name), view.sample_rate, &aligned)?;
        info!("delayed {} by {:?} samples", path.display(), d);
    }
    Ok(())
}
