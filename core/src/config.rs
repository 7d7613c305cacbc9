//! Configuration for the particle filter and for scenario replay.
//!
//! A [`SimulationConfig`], which embeds the [`FilterConfig`], can be stored as JSON, YAML or TOML. The format
//! is chosen by file extension in [`SimulationConfig::from_file`] / [`SimulationConfig::to_file`].

use crate::error::{FilterError, check_measurement_std, check_noise_std};
use crate::motion::DEFAULT_YAW_RATE_THRESHOLD;
use crate::particle::{AveragingStrategy, DegeneratePolicy, ResamplingStrategy};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Default number of particles
pub const DEFAULT_NUM_PARTICLES: usize = 100;

fn default_num_particles() -> usize {
    DEFAULT_NUM_PARTICLES
}
fn default_yaw_rate_threshold() -> f64 {
    DEFAULT_YAW_RATE_THRESHOLD
}
fn default_true() -> bool {
    true
}

/// Parameters fixed for the lifetime of a [`ParticleFilter`](crate::particle::ParticleFilter).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Number of particles, constant for the filter's lifetime
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,
    /// Yaw rates at or below this magnitude use the straight-line motion model
    #[serde(default = "default_yaw_rate_threshold")]
    pub yaw_rate_threshold: f64,
    /// Seed for the filter's random number generator. `None` seeds from the operating system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default)]
    pub resampling_strategy: ResamplingStrategy,
    /// What to do when every particle weight is zero at resampling time
    #[serde(default)]
    pub degenerate_policy: DegeneratePolicy,
    /// How the particle cloud is summarized into a single pose
    #[serde(default)]
    pub averaging_strategy: AveragingStrategy,
    /// Store landmark associations and sensed map coordinates on every particle during weighting
    #[serde(default = "default_true")]
    pub record_associations: bool,
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: DEFAULT_NUM_PARTICLES,
            yaw_rate_threshold: DEFAULT_YAW_RATE_THRESHOLD,
            seed: None,
            resampling_strategy: ResamplingStrategy::default(),
            degenerate_policy: DegeneratePolicy::default(),
            averaging_strategy: AveragingStrategy::default(),
            record_associations: true,
        }
    }
}
impl FilterConfig {
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.num_particles == 0 {
            return Err(FilterError::InvalidConfig(
                "num_particles must be at least 1".to_string(),
            ));
        }
        if !self.yaw_rate_threshold.is_finite() || self.yaw_rate_threshold <= 0.0 {
            return Err(FilterError::InvalidConfig(format!(
                "yaw_rate_threshold must be positive and finite, got {}",
                self.yaw_rate_threshold
            )));
        }
        Ok(())
    }
}

/// Logging preferences used by the command line tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (off, error, warn, info, debug, trace)
    pub level: String,
    /// Optional log file; logs go to stderr when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}
impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Full description of a localization run: filter settings, noise parameters and data locations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Standard deviations (x, y, theta) of the prior pose used to seed the particles
    pub initial_std: [f64; 3],
    /// Process noise standard deviations (x, y, theta) injected at every prediction
    pub process_std: [f64; 3],
    /// Landmark measurement standard deviations (x, y)
    pub landmark_std: [f64; 2],
    /// Maximum reliable sensor range (m)
    pub sensor_range: f64,
    /// Landmark map CSV file (`id,x,y`). Relative paths in a config file are taken relative to that file's
    /// directory (see [`SimulationConfig::resolve_paths`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    /// Directory holding `controls.csv`, `observations.csv` and optionally `ground_truth.csv`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Output CSV for the per-step localization result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}
impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            initial_std: [0.3, 0.3, 0.01],
            process_std: [0.3, 0.3, 0.01],
            landmark_std: [0.3, 0.3],
            sensor_range: 50.0,
            map: None,
            data: None,
            output: None,
            filter: FilterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
impl SimulationConfig {
    /// Check every numeric parameter before a run starts.
    pub fn validate(&self) -> Result<(), FilterError> {
        self.filter.validate()?;
        for (name, value) in ["initial x", "initial y", "initial theta"]
            .into_iter()
            .zip(self.initial_std)
        {
            check_noise_std(name, value)?;
        }
        for (name, value) in ["process x", "process y", "process theta"]
            .into_iter()
            .zip(self.process_std)
        {
            check_noise_std(name, value)?;
        }
        check_measurement_std("landmark x", self.landmark_std[0])?;
        check_measurement_std("landmark y", self.landmark_std[1])?;
        if self.sensor_range.is_nan() || self.sensor_range < 0.0 {
            return Err(FilterError::InvalidConfig(format!(
                "sensor_range must be non-negative, got {}",
                self.sensor_range
            )));
        }
        Ok(())
    }
    /// Rewrite the relative `map`, `data`, `output` and `logging.file` paths as paths under `base`, usually
    /// the directory holding the configuration file. Absolute paths are left alone.
    pub fn resolve_paths<P: AsRef<Path>>(&mut self, base: P) {
        let base = base.as_ref();
        for path in [
            &mut self.map,
            &mut self.data,
            &mut self.output,
            &mut self.logging.file,
        ]
        .into_iter()
        .flatten()
        {
            if Path::new(path.as_str()).is_relative() {
                *path = base.join(path.as_str()).display().to_string();
            }
        }
    }
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        read_toml(path)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported_extension(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
            "unsupported file extension for '{}' (expected .json, .yaml, .yml or .toml)",
            path.display()
        ),
    )
}

fn read_toml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> io::Result<T> {
    let mut s = String::new();
    let mut file = File::open(path)?;
    file.read_to_string(&mut s)?;
    toml::from_str(&s).map_err(io::Error::other)
}
