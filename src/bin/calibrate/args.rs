// Commandline argument parser using clap for calibrate

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct CalibrateArgs {
    #[command(subcommand, long_about)]
    /// Which task to perform
    pub command: CommandTask,

    /// RON file of tunables; anything it leaves out keeps its default
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Find smooth per-view delays for the IRs of one source
    #[command(about)]
    Views(ViewsCommand),

    /// Delay IRs by the calibrated amounts so that their onsets line up
    #[command(about)]
    Apply(ApplyCommand),

    /// Find the delays between every source and ear of a measurement
    #[command(about)]
    Global(GlobalCommand),

    /// Print the default configuration as RON
    #[command(about)]
    DefaultConfig,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct ViewsCommand {
    /// One WAV file per view, with one channel per ear
    #[arg(short = 'f', long = "files")]
    #[clap(num_args = 1..)]
    pub filenames: Vec<PathBuf>,

    /// View azimuth of each file, in degrees
    #[arg(short = 'a', long = "azimuths", allow_negative_numbers = true)]
    #[clap(num_args = 1..)]
    pub azimuths: Vec<f64>,

    /// Filename for the RON results to be written to
    #[arg(short = 'o', long = "out")]
    pub outfile: PathBuf,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct ApplyCommand {
    /// Results written by the views command
    #[arg(short = 'r', long = "results")]
    pub results: PathBuf,

    /// The WAV files the results were calculated from, in the same order
    #[arg(short = 'f', long = "files")]
    #[clap(num_args = 1..)]
    pub filenames: Vec<PathBuf>,

    /// Directory for the aligned WAV files, which keep their file names
    #[arg(short = 'o', long = "out-dir")]
    pub out_dir: PathBuf,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct GlobalCommand {
    /// One WAV file per view, with one channel per source and ear
    #[arg(short = 'f', long = "files")]
    #[clap(num_args = 1..)]
    pub filenames: Vec<PathBuf>,

    /// RON list of per-view delays of each channel, in oversampled samples;
    /// without it every view is taken to need the same delays
    #[arg(short = 'd', long = "view-delays")]
    pub view_delays: Option<PathBuf>,

    /// Number of annealing steps, replacing the default global schedule's
    #[arg(short = 's', long = "steps")]
    pub steps: Option<u64>,

    /// Filename for the RON results to be written to
    #[arg(short = 'o', long = "out")]
    pub outfile: PathBuf,
}
