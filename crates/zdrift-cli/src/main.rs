//! zdrift CLI: manage dynamic Z-offset calibration state from the shell.

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;

use zdrift::{
    CalibrateError, Calibrator, CalibratorConfig, FitMode, FitStats, OffsetModel, ProbeSample,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "zdrift")]
#[command(about = "Learn and predict dynamic nozzle-to-bed Z-offset corrections from print history")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show calibration state: baseline, sample counts, model summary.
    Status(CliStatusArgs),

    /// Record a probe taken at print start (creates a pending observation).
    Record(CliRecordArgs),

    /// Label the pending observation with the offset applied to this print,
    /// then refresh the model when enough samples exist.
    Complete(CliCompleteArgs),

    /// Refit the offset model over the labeled history.
    Fit(CliFitArgs),

    /// Predict the correction for the next print from fresh probe values.
    Predict(CliPredictArgs),

    /// Install a freshly probed baseline, clearing history and model.
    Recalibrate(CliRecalibrateArgs),
}

#[derive(Debug, Clone, Args)]
struct CliDataArgs {
    /// Directory holding the calibration state files.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CliProbeArgs {
    /// Probed bed height delta against the reference, in mm.
    #[arg(long)]
    bed_delta: f64,

    /// Nozzle temperature during the probe (°C).
    #[arg(long, default_value_t = 0.0)]
    nozzle_temp: f64,

    /// Bed temperature during the probe (°C).
    #[arg(long, default_value_t = 0.0)]
    bed_temp: f64,

    /// Auxiliary sensor temperature (°C); leave 0 when the printer has none.
    #[arg(long, default_value_t = 0.0)]
    sensor_temp: f64,

    /// Build plate name (e.g. textured_pei, cool_plate, high_temp).
    #[arg(long)]
    bed_type: String,
}

impl CliProbeArgs {
    fn to_core(&self) -> ProbeSample {
        ProbeSample {
            nozzle_temperature: self.nozzle_temp,
            bed_temperature: self.bed_temp,
            sensor_temperature: self.sensor_temp,
            bed_surface_type: self.bed_type.clone(),
            bed_probed_delta: self.bed_delta,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FitModeArg {
    Linear,
    Polynomial,
}

impl FitModeArg {
    fn to_core(self) -> FitMode {
        match self {
            Self::Linear => FitMode::Linear,
            Self::Polynomial => FitMode::Polynomial,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CliStatusArgs {
    #[command(flatten)]
    data: CliDataArgs,

    /// Print the state as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Args)]
struct CliRecordArgs {
    #[command(flatten)]
    data: CliDataArgs,

    #[command(flatten)]
    probe: CliProbeArgs,
}

#[derive(Debug, Clone, Args)]
struct CliCompleteArgs {
    #[command(flatten)]
    data: CliDataArgs,

    /// Offset the operator settled on for this print, in mm.
    #[arg(long)]
    z_offset: f64,
}

#[derive(Debug, Clone, Args)]
struct CliFitArgs {
    #[command(flatten)]
    data: CliDataArgs,

    /// Model family to fit.
    #[arg(long, value_enum, default_value_t = FitModeArg::Linear)]
    mode: FitModeArg,

    /// Multiplier on the robust residual spread when screening outliers.
    #[arg(long, default_value_t = 3.0)]
    deviation_factor: f64,

    /// Minimum labeled sample count before outlier screening runs.
    #[arg(long, default_value_t = 20)]
    outlier_min_samples: usize,

    /// Labeled sample count a polynomial fit must exceed.
    #[arg(long, default_value_t = 30)]
    poly_min_samples: usize,

    /// Print the fitted model as JSON instead of a factor table.
    #[arg(long)]
    json: bool,
}

impl CliFitArgs {
    fn to_config(&self) -> CalibratorConfig {
        let mut config = CalibratorConfig {
            mode: self.mode.to_core(),
            ..CalibratorConfig::default()
        };
        config.fit.deviation_factor = self.deviation_factor;
        config.fit.outlier_min_samples = self.outlier_min_samples;
        config.fit.poly_min_samples = self.poly_min_samples;
        config
    }
}

#[derive(Debug, Clone, Args)]
struct CliPredictArgs {
    #[command(flatten)]
    data: CliDataArgs,

    #[command(flatten)]
    probe: CliProbeArgs,

    /// Print the prediction as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Args)]
struct CliRecalibrateArgs {
    #[command(flatten)]
    data: CliDataArgs,

    /// Sign-adjusted nozzle trigger height from the fresh baseline probe,
    /// in mm.
    #[arg(long)]
    nozzle_reference_z: f64,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status(args) => run_status(&args),
        Commands::Record(args) => run_record(&args),
        Commands::Complete(args) => run_complete(&args),
        Commands::Fit(args) => run_fit(&args),
        Commands::Predict(args) => run_predict(&args),
        Commands::Recalibrate(args) => run_recalibrate(&args),
    }
}

fn open_calibrator(data: &CliDataArgs) -> Calibrator {
    Calibrator::open(&data.data_dir, CalibratorConfig::default())
}

// ── status ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ModelSummary {
    mode: FitMode,
    n_samples: usize,
    n_outliers: usize,
    r_squared: f64,
    error: f64,
}

impl ModelSummary {
    fn new(model: &OffsetModel) -> Self {
        Self {
            mode: model.mode,
            n_samples: model.stats.n_samples,
            n_outliers: model.stats.n_outliers,
            r_squared: model.stats.r_squared,
            error: model.stats.error,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    data_dir: String,
    nozzle_reference_z: f64,
    n_observations: usize,
    n_labeled: usize,
    n_pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<ModelSummary>,
}

fn run_status(args: &CliStatusArgs) -> CliResult<()> {
    let calibrator = open_calibrator(&args.data);
    let observations = calibrator.store().observations();
    let n_labeled = observations.iter().filter(|o| o.is_labeled()).count();

    let report = StatusReport {
        data_dir: args.data.data_dir.display().to_string(),
        nozzle_reference_z: calibrator.nozzle_reference_z(),
        n_observations: observations.len(),
        n_labeled,
        n_pending: observations.len() - n_labeled,
        model: calibrator.model().map(ModelSummary::new),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("zdrift calibration state ({})", report.data_dir);
    println!("  baseline nozzle z:  {:+.5} mm", report.nozzle_reference_z);
    println!(
        "  observations:       {} ({} labeled, {} pending)",
        report.n_observations, report.n_labeled, report.n_pending
    );
    match &report.model {
        Some(model) => {
            println!(
                "  model:              {:?}, {} samples, {} rejected",
                model.mode, model.n_samples, model.n_outliers
            );
            println!(
                "  fit quality:        r^2 = {:.4} ± {:.4}",
                model.r_squared, model.error
            );
        }
        None => println!("  model:              none (uncalibrated)"),
    }
    Ok(())
}

// ── record ─────────────────────────────────────────────────────────────────

fn run_record(args: &CliRecordArgs) -> CliResult<()> {
    let mut calibrator = open_calibrator(&args.data);
    let id = calibrator.record_observation(&args.probe.to_core())?;
    println!(
        "Recorded observation #{} (bed delta {:+.5} mm, {}).",
        id.0, args.probe.bed_delta, args.probe.bed_type
    );
    Ok(())
}

// ── complete ───────────────────────────────────────────────────────────────

fn run_complete(args: &CliCompleteArgs) -> CliResult<()> {
    let mut calibrator = open_calibrator(&args.data);
    calibrator.complete_observation(args.z_offset)?;
    println!("Captured offset {:+.5} mm.", args.z_offset);

    // refresh the model in the background of the capture, as the printer
    // firmware does after each print
    match calibrator.fit() {
        Ok(model) => {
            println!(
                "Model refreshed over {} samples (r^2 = {:.4}).",
                model.stats.n_samples, model.stats.r_squared
            );
        }
        Err(CalibrateError::InsufficientData { needed, got }) => {
            tracing::info!("waiting for more samples before fitting ({got} of {needed})");
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

// ── fit ────────────────────────────────────────────────────────────────────

fn run_fit(args: &CliFitArgs) -> CliResult<()> {
    let mut calibrator = Calibrator::open(&args.data.data_dir, args.to_config());
    let model = calibrator.fit()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&model)?);
        return Ok(());
    }

    println!(
        "Fitted {:?} model over {} samples ({} rejected), r^2 = {:.4} ± {:.4}",
        model.mode,
        model.stats.n_samples,
        model.stats.n_outliers,
        model.stats.r_squared,
        model.stats.error
    );
    for (name, factor) in &model.factors {
        println!("  {name:>24}  {factor:+.6}");
    }
    Ok(())
}

// ── predict ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct PredictionReport {
    correction: f64,
    calibrated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<FitStats>,
}

fn run_predict(args: &CliPredictArgs) -> CliResult<()> {
    let calibrator = open_calibrator(&args.data);
    let correction = calibrator.predict(&args.probe.to_core())?;
    let report = PredictionReport {
        correction,
        calibrated: calibrator.model().is_some(),
        stats: calibrator.model().map(|m| m.stats.clone()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.calibrated {
        println!("Suggested correction: {correction:+.5} mm");
    } else {
        println!("Suggested correction: {correction:+.5} mm (uncalibrated baseline fallback)");
    }
    Ok(())
}

// ── recalibrate ────────────────────────────────────────────────────────────

fn run_recalibrate(args: &CliRecalibrateArgs) -> CliResult<()> {
    let mut calibrator = open_calibrator(&args.data);
    calibrator.recalibrate_baseline(args.nozzle_reference_z)?;
    println!(
        "Baseline set to {:+.5} mm; observation log and model cleared.",
        args.nozzle_reference_z
    );
    Ok(())
}
