// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use env_logger;
use log::{error, info, warn};

use survival_tracker::config::{MatchPolicy, TrackerConfig};
use survival_tracker::error::{Result, TrackError};
use survival_tracker::export::{write_csv, SurvivalRecord};
use survival_tracker::pool::{track_wells, WellJob};
use survival_tracker::stack::enumerate_wells;
use survival_tracker::tracker::Tracker;
use survival_tracker::units::{Binning, Microscope};

/// Tracks neurons through time-lapse stacks, one multi-page TIFF per well,
/// and writes their survival records.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Directory of per-well .tif stacks.
    #[arg(short, long)]
    input: PathBuf,

    /// Directory where survival.csv and annotations are written.
    #[arg(short, long)]
    output: PathBuf,

    /// JSON configuration file. Flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Objective magnification, e.g. 10.
    #[arg(short, long)]
    magnification: Option<f64>,

    /// One of ixm, flo, flo2, ds, ds2, ds3.
    #[arg(long)]
    microscope: Option<Microscope>,

    /// Camera binning: 1x1, 2x2, 3x3 or 4x4.
    #[arg(short, long)]
    binning: Option<Binning>,

    /// Global threshold is mean + this many standard deviations.
    #[arg(long)]
    threshold_multiplier: Option<f64>,

    /// Smallest soma diameter, in micrometers.
    #[arg(long)]
    cell_min_dia: Option<f64>,

    /// Largest soma diameter, in micrometers.
    #[arg(long)]
    cell_max_dia: Option<f64>,

    /// Farthest a soma may move between frames, in micrometers.
    #[arg(long)]
    max_travel: Option<f64>,

    /// Circularity above which a shrinking, dimming soma is dead.
    #[arg(long)]
    death_circularity: Option<f64>,

    /// Pixels cropped from each frame edge.
    #[arg(long)]
    crop_margin: Option<u32>,

    /// Skip writing annotated frames.
    #[arg(long, default_value_t = false)]
    no_annotate: std::primitive::bool,

    /// Minimize total travel when matching instead of greedy
    /// nearest-neighbor matching.
    #[arg(long, default_value_t = false)]
    optimal_matching: std::primitive::bool,

    /// Number of wells processed concurrently. 0 uses one per core.
    #[arg(short, long, default_value_t = 0)]
    workers: usize,
}

fn build_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => {
            let missing = |flag: &str| TrackError::InvalidConfig(
                format!("--{} is required without --config", flag));
            TrackerConfig::new(args.magnification.ok_or_else(|| missing("magnification"))?,
                               args.microscope.ok_or_else(|| missing("microscope"))?,
                               args.binning.ok_or_else(|| missing("binning"))?)
        }
    };
    if let Some(v) = args.magnification { config.magnification = v; }
    if let Some(v) = args.microscope { config.microscope = v; }
    if let Some(v) = args.binning { config.binning = v; }
    if let Some(v) = args.threshold_multiplier { config.threshold_multiplier = v; }
    if let Some(v) = args.cell_min_dia { config.cell_min_dia_um = v; }
    if let Some(v) = args.cell_max_dia { config.cell_max_dia_um = v; }
    if let Some(v) = args.max_travel { config.max_travel_um = v; }
    if let Some(v) = args.death_circularity { config.death_circularity_threshold = v; }
    if let Some(v) = args.crop_margin { config.crop_margin = v; }
    if args.no_annotate { config.annotate = false; }
    if args.optimal_matching { config.match_policy = MatchPolicy::Optimal; }
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<()> {
    let run_start = Instant::now();
    let config = build_config(args)?;
    info!("Configuration: {:?}", config);
    fs::create_dir_all(&args.output)?;

    let jobs: Vec<WellJob> = enumerate_wells(&args.input)?.into_iter()
        .map(|(well, path)| WellJob{well, path}).collect();
    if jobs.is_empty() {
        warn!("No .tif stacks found in {:?}", args.input);
    }
    let annotation_dir = if config.annotate {
        Some(args.output.join("annotated"))
    } else {
        None
    };
    let tracker = Tracker::new(config);
    let outcomes = track_wells(&tracker, &jobs, args.workers, annotation_dir.as_deref())?;

    let mut records = Vec::<SurvivalRecord>::new();
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(result) => records.extend(SurvivalRecord::from_well(result)),
            Err(e) => {
                error!("Well {}: {}", outcome.well, e);
                failed += 1;
            }
        }
    }
    write_csv(&records, &args.output.join("survival.csv"))?;
    info!("Processed {} wells ({} failed) in {:?}",
          outcomes.len(), failed, run_start.elapsed());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
