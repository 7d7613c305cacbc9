//! MCL: landmark-based Monte Carlo localization for a planar vehicle.
//!
//! The tool replays a recorded scenario (controls, landmark detections and optional ground truth) against a
//! landmark map, or generates a synthetic scenario on a grid of landmarks and localizes within it. Each run
//! writes one CSV row per step with the best particle, the cloud estimate and the association diagnostics.
//!
//! You can run it either by:
//!   1. Loading all parameters from a configuration file (TOML/JSON/YAML) with `--config`
//!   2. Specifying parameters via command-line flags

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::info;
use mcl::config::SimulationConfig;
use mcl::map::Map;
use mcl::particle::{DegeneratePolicy, ResamplingStrategy};
use mcl::sim::{
    LocalizationResult, ScenarioData, ScenarioParams, generate_scenario, grid_map, run_localization,
};
use mcl::{Control, Pose2D};

use std::path::{Path, PathBuf};

const LONG_ABOUT: &str = "MCL: landmark-based Monte Carlo localization for a planar vehicle.

A particle filter tracks the vehicle pose (x, y, heading) on a known map of point landmarks. Every step the
particles are moved with the velocity / yaw-rate motion model, weighted against the vehicle-frame landmark
detections and resampled.

- run: replay a scenario directory (controls.csv, observations.csv, optional ground_truth.csv) against a
  landmark map (id,x,y).
- simulate: generate a synthetic scenario on a grid of landmarks and localize within it.
- create-config: write a template configuration file.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Landmark-based Monte Carlo localization.", long_about = LONG_ABOUT)]
struct Cli {
    /// Run from a configuration file (TOML/JSON/YAML)
    /// This option overrides any subcommand arguments
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Command to execute (ignored if --config is provided)
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Localize against a recorded scenario",
        long_about = "Replay a recorded scenario directory through the particle filter. The directory holds controls.csv (step,dt,velocity,yaw_rate), observations.csv (step,x,y) and optionally ground_truth.csv (step,x,y,theta). When ground truth is present the per-step errors of the best particle are reported."
    )]
    Run(RunArgs),
    #[command(
        name = "simulate",
        about = "Generate a synthetic scenario and localize within it",
        long_about = "Place landmarks on a regular grid (or load a map), drive a vehicle with a constant velocity and yaw rate, corrupt its controls and landmark detections with Gaussian noise, then localize within the generated scenario."
    )]
    Simulate(SimulateArgs),
    #[command(name = "create-config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

/// Filter settings that override the configuration defaults
#[derive(Args, Clone, Debug, Default)]
struct FilterArgs {
    /// Number of particles
    #[arg(short = 'n', long)]
    num_particles: Option<usize>,

    /// Seed for the filter's random number generator
    #[arg(long)]
    seed: Option<u64>,

    /// Resampling scheme
    #[arg(long, value_enum)]
    resampling: Option<ResamplingStrategy>,

    /// Behaviour when every particle weight is zero
    #[arg(long, value_enum)]
    degenerate_policy: Option<DegeneratePolicy>,

    /// Maximum sensor range (m)
    #[arg(long)]
    sensor_range: Option<f64>,
}
impl FilterArgs {
    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(n) = self.num_particles {
            config.filter.num_particles = n;
        }
        if let Some(seed) = self.seed {
            config.filter.seed = Some(seed);
        }
        if let Some(strategy) = self.resampling {
            config.filter.resampling_strategy = strategy;
        }
        if let Some(policy) = self.degenerate_policy {
            config.filter.degenerate_policy = policy;
        }
        if let Some(range) = self.sensor_range {
            config.sensor_range = range;
        }
    }
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Landmark map CSV file (id,x,y)
    #[arg(short, long, value_parser)]
    map: PathBuf,

    /// Scenario directory
    #[arg(short, long, value_parser)]
    data: PathBuf,

    /// Output CSV file path
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Prior pose as x y theta; defaults to the first ground truth pose
    #[arg(long, num_args = 3, value_names = ["X", "Y", "THETA"], allow_negative_numbers = true)]
    initial_pose: Option<Vec<f64>>,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args, Clone, Debug)]
struct SimulateArgs {
    /// Output CSV file path for the localization result
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Landmark map CSV file; a grid of landmarks is generated when omitted
    #[arg(short, long, value_parser)]
    map: Option<PathBuf>,

    /// Also write the generated scenario (and map) into this directory
    #[arg(long, value_parser)]
    scenario_dir: Option<PathBuf>,

    /// Number of steps
    #[arg(long, default_value_t = 200)]
    steps: usize,

    /// Time step (s)
    #[arg(long, default_value_t = 0.1)]
    dt: f64,

    /// Commanded velocity (m/s)
    #[arg(long, default_value_t = 5.0, allow_negative_numbers = true)]
    velocity: f64,

    /// Commanded yaw rate (rad/s)
    #[arg(long, default_value_t = 0.1, allow_negative_numbers = true)]
    yaw_rate: f64,

    /// Landmarks per side of the generated grid
    #[arg(long, default_value_t = 12)]
    grid_size: usize,

    /// Spacing between generated landmarks (m)
    #[arg(long, default_value_t = 15.0)]
    grid_spacing: f64,

    /// Seed for scenario generation
    #[arg(long, default_value_t = 42)]
    scenario_seed: u64,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file path for the config file
    /// File extension determines format: .json, .yaml/.yml, or .toml (recommended)
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

fn load_map(path: &Path) -> Result<Map> {
    let map = Map::from_csv(path)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("failed to read map {}", path.display()))?;
    info!("Read {} landmarks from {}", map.len(), path.display());
    Ok(map)
}

fn load_scenario(dir: &Path) -> Result<ScenarioData> {
    let scenario = ScenarioData::from_csv_dir(dir)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("failed to read scenario {}", dir.display()))?;
    info!("Read {} steps from {}", scenario.len(), dir.display());
    Ok(scenario)
}

fn write_result(result: &LocalizationResult, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    result
        .to_csv(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("Wrote {} steps to {}", result.steps.len(), output.display());
    Ok(())
}

fn localize(
    config: &SimulationConfig,
    map: &Map,
    scenario: &ScenarioData,
    initial_pose: Option<Pose2D>,
    output: &Path,
) -> Result<()> {
    if scenario.is_empty() {
        bail!("scenario has no steps");
    }
    let initial_pose = match initial_pose.or_else(|| scenario.initial_ground_truth()) {
        Some(pose) => pose,
        None => bail!("no initial pose given and the scenario has no ground truth for step 0"),
    };
    info!(
        "Localizing with {} particles from {}",
        config.filter.num_particles, initial_pose
    );
    let result = run_localization(config, map, scenario, initial_pose)?;
    write_result(&result, output)
}

fn run_scenario(args: &RunArgs) -> Result<()> {
    let mut config = SimulationConfig::default();
    args.filter.apply(&mut config);
    let map = load_map(&args.map)?;
    let scenario = load_scenario(&args.data)?;
    let initial_pose = args
        .initial_pose
        .as_ref()
        .map(|p| Pose2D::new(p[0], p[1], p[2]));
    localize(&config, &map, &scenario, initial_pose, &args.output)
}

fn run_simulation(args: &SimulateArgs) -> Result<()> {
    let mut config = SimulationConfig::default();
    args.filter.apply(&mut config);
    let map = match &args.map {
        Some(path) => load_map(path)?,
        None => grid_map(args.grid_size, args.grid_spacing),
    };
    let params = ScenarioParams {
        num_steps: args.steps,
        dt: args.dt,
        control: Control::new(args.velocity, args.yaw_rate),
        sensor_range: config.sensor_range,
        seed: args.scenario_seed,
        ..ScenarioParams::default()
    };
    let scenario = generate_scenario(&map, &params)?;
    info!(
        "Generated {} steps on a map of {} landmarks",
        scenario.len(),
        map.len()
    );
    if let Some(dir) = &args.scenario_dir {
        scenario
            .to_csv_dir(dir)
            .with_context(|| format!("failed to write scenario to {}", dir.display()))?;
        map.to_csv(dir.join("map.csv"))?;
        info!("Wrote scenario and map to {}", dir.display());
    }
    localize(&config, &map, &scenario, Some(params.start), &args.output)
}

/// Read a config file with its relative paths resolved against the file's own directory.
fn load_config(config_path: &Path) -> Result<SimulationConfig> {
    let mut config = SimulationConfig::from_file(config_path)
        .with_context(|| format!("failed to read config {}", config_path.display()))?;
    if let Some(base) = config_path.parent() {
        config.resolve_paths(base);
    }
    Ok(config)
}

fn run_from_config(config: &SimulationConfig) -> Result<()> {
    let (Some(map), Some(data), Some(output)) = (&config.map, &config.data, &config.output) else {
        bail!("config must name a map file, a data directory and an output file");
    };
    let map = load_map(Path::new(map))?;
    let scenario = load_scenario(Path::new(data))?;
    localize(config, &map, &scenario, None, Path::new(output))
}

fn create_config_file(args: &CreateConfigArgs) -> Result<()> {
    let config = SimulationConfig {
        map: Some("map.csv".to_string()),
        data: Some("data".to_string()),
        output: Some("localization.csv".to_string()),
        ..SimulationConfig::default()
    };
    config
        .to_file(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("Wrote template configuration to {}", args.output.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(ref config_path) = cli.config {
        let config = load_config(config_path)?;
        let config_log_file = config.logging.file.as_ref().map(PathBuf::from);
        let log_file = cli.log_file.as_ref().or(config_log_file.as_ref());
        init_logger(&config.logging.level, log_file)?;
        return run_from_config(&config);
    }

    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    match cli.command {
        Some(Command::Run(args)) => run_scenario(&args),
        Some(Command::Simulate(args)) => run_simulation(&args),
        Some(Command::CreateConfig(args)) => create_config_file(&args),
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    }
}
