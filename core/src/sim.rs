//! Scenario data, replay and synthetic scenario generation.
//!
//! This module provides:
//! - CSV records for controls, observations and ground truth, grouped into a [`ScenarioData`]
//! - [`run_localization`] which replays a scenario through a [`ParticleFilter`] and scores it
//! - [`LocalizationResult`] for storing and exporting the per-step output
//! - [`generate_scenario`] for building synthetic scenarios on a known map
//!
//! A scenario directory holds three files:
//! - `controls.csv` with `step,dt,velocity,yaw_rate`. The control of step `k` moves the agent from step
//!   `k - 1` to step `k`; the control of step 0 is ignored.
//! - `observations.csv` with `step,x,y`, any number of vehicle-frame detections per step.
//! - `ground_truth.csv` with `step,x,y,theta` (optional).

use crate::config::SimulationConfig;
use crate::diagnostics::AssociationRecord;
use crate::error::FilterError;
use crate::map::{Landmark, Map};
use crate::measurements::LandmarkObservation;
use crate::motion::predict_pose;
use crate::particle::{ParticleFilter, PoseEstimate, ResampleOutcome};
use crate::{Control, Pose2D, wrap_to_pi};

use log::{debug, info};
use nalgebra::{Rotation2, Vector2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use std::error::Error;
use std::fs;
use std::io;
use std::path::Path;

pub const CONTROLS_FILE: &str = "controls.csv";
pub const OBSERVATIONS_FILE: &str = "observations.csv";
pub const GROUND_TRUTH_FILE: &str = "ground_truth.csv";

/// One row of `controls.csv`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub step: usize,
    /// Time elapsed since the previous step in seconds
    pub dt: f64,
    /// Commanded velocity in m/s
    pub velocity: f64,
    /// Commanded yaw rate in rad/s
    pub yaw_rate: f64,
}

/// One row of `observations.csv`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub step: usize,
    pub x: f64,
    pub y: f64,
}

/// One row of `ground_truth.csv`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthRecord {
    pub step: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// Everything the filter receives at one step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScenarioStep {
    pub dt: f64,
    pub control: Control,
    pub observations: Vec<LandmarkObservation>,
    pub ground_truth: Option<Pose2D>,
}

/// Ordered sequence of steps to replay.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScenarioData {
    pub steps: Vec<ScenarioStep>,
}
impl ScenarioData {
    pub fn len(&self) -> usize {
        self.steps.len()
    }
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
    /// Ground truth of the first step, usable as the prior pose
    pub fn initial_ground_truth(&self) -> Option<Pose2D> {
        self.steps.first().and_then(|s| s.ground_truth)
    }
    /// Reads a scenario directory (see the module documentation for the file layout).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mcl::sim::ScenarioData;
    ///
    /// let scenario = ScenarioData::from_csv_dir("./data/run_01").expect("Failed to read scenario");
    /// println!("Loaded {} steps", scenario.len());
    /// ```
    pub fn from_csv_dir<P: AsRef<Path>>(dir: P) -> Result<Self, Box<dyn Error>> {
        let dir = dir.as_ref();
        let controls: Vec<ControlRecord> = read_records(dir.join(CONTROLS_FILE))?;
        let mut steps: Vec<ScenarioStep> = Vec::with_capacity(controls.len());
        for (k, record) in controls.iter().enumerate() {
            if record.step != k {
                return Err(format!(
                    "{}: expected step {} on row {}, found step {}",
                    CONTROLS_FILE,
                    k,
                    k + 1,
                    record.step
                )
                .into());
            }
            steps.push(ScenarioStep {
                dt: record.dt,
                control: Control::new(record.velocity, record.yaw_rate),
                ..ScenarioStep::default()
            });
        }
        let observations: Vec<ObservationRecord> = read_records(dir.join(OBSERVATIONS_FILE))?;
        for record in observations {
            let step = steps.get_mut(record.step).ok_or_else(|| {
                format!(
                    "{}: step {} has no matching control",
                    OBSERVATIONS_FILE, record.step
                )
            })?;
            step.observations.push(LandmarkObservation::new(record.x, record.y));
        }
        let truth_path = dir.join(GROUND_TRUTH_FILE);
        if truth_path.exists() {
            let truth: Vec<GroundTruthRecord> = read_records(truth_path)?;
            for record in truth {
                let step = steps.get_mut(record.step).ok_or_else(|| {
                    format!(
                        "{}: step {} has no matching control",
                        GROUND_TRUTH_FILE, record.step
                    )
                })?;
                step.ground_truth = Some(Pose2D::new(record.x, record.y, record.theta));
            }
        }
        Ok(ScenarioData { steps })
    }
    /// Writes the scenario as a directory of CSV files. `ground_truth.csv` is only written when at least one
    /// step carries ground truth.
    pub fn to_csv_dir<P: AsRef<Path>>(&self, dir: P) -> io::Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut controls = csv::Writer::from_path(dir.join(CONTROLS_FILE))?;
        let mut observations = csv::Writer::from_path(dir.join(OBSERVATIONS_FILE))?;
        for (k, step) in self.steps.iter().enumerate() {
            controls.serialize(ControlRecord {
                step: k,
                dt: step.dt,
                velocity: step.control.velocity,
                yaw_rate: step.control.yaw_rate,
            })?;
            for observation in &step.observations {
                observations.serialize(ObservationRecord {
                    step: k,
                    x: observation.x,
                    y: observation.y,
                })?;
            }
        }
        controls.flush()?;
        observations.flush()?;
        if self.steps.iter().any(|s| s.ground_truth.is_some()) {
            let mut truth = csv::Writer::from_path(dir.join(GROUND_TRUTH_FILE))?;
            for (k, step) in self.steps.iter().enumerate() {
                if let Some(pose) = step.ground_truth {
                    truth.serialize(GroundTruthRecord {
                        step: k,
                        x: pose.x,
                        y: pose.y,
                        theta: pose.theta,
                    })?;
                }
            }
            truth.flush()?;
        }
        Ok(())
    }
}

fn read_records<T: serde::de::DeserializeOwned, P: AsRef<Path>>(
    path: P,
) -> Result<Vec<T>, Box<dyn Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result?;
        records.push(record);
    }
    Ok(records)
}

/// Output of one localization cycle, flattened for CSV export.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: usize,
    /// Pose of the highest-weight particle after resampling
    pub best_x: f64,
    pub best_y: f64,
    pub best_theta: f64,
    /// Cloud summary using the configured averaging strategy
    pub mean_x: f64,
    pub mean_y: f64,
    pub mean_theta: f64,
    pub effective_sample_size: f64,
    /// Whether every weight was zero this cycle
    pub degenerate: bool,
    pub truth_x: Option<f64>,
    pub truth_y: Option<f64>,
    pub truth_theta: Option<f64>,
    /// Absolute errors of the best particle against ground truth, heading error wrapped to [0, pi]
    pub error_x: Option<f64>,
    pub error_y: Option<f64>,
    pub error_theta: Option<f64>,
    pub associations: String,
    pub sense_x: String,
    pub sense_y: String,
}
impl StepResult {
    fn new(
        step: usize,
        best: &Pose2D,
        record: &AssociationRecord,
        estimate: &PoseEstimate,
        outcome: ResampleOutcome,
        truth: Option<Pose2D>,
    ) -> Self {
        StepResult {
            step,
            best_x: best.x,
            best_y: best.y,
            best_theta: best.theta,
            mean_x: estimate.pose.x,
            mean_y: estimate.pose.y,
            mean_theta: estimate.pose.theta,
            effective_sample_size: estimate.effective_sample_size,
            degenerate: outcome.is_degenerate(),
            truth_x: truth.map(|t| t.x),
            truth_y: truth.map(|t| t.y),
            truth_theta: truth.map(|t| t.theta),
            error_x: truth.map(|t| (best.x - t.x).abs()),
            error_y: truth.map(|t| (best.y - t.y).abs()),
            error_theta: truth.map(|t| wrap_to_pi(best.theta - t.theta).abs()),
            associations: record.associations(),
            sense_x: record.sense_x(),
            sense_y: record.sense_y(),
        }
    }
    pub fn best_pose(&self) -> Pose2D {
        Pose2D::new(self.best_x, self.best_y, self.best_theta)
    }
}

/// Per-step localization output of one replay.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalizationResult {
    pub name: String,
    pub steps: Vec<StepResult>,
}
impl LocalizationResult {
    pub fn new(name: &str) -> Self {
        LocalizationResult {
            name: name.to_string(),
            steps: Vec::new(),
        }
    }
    /// Mean absolute error (x, y, theta) of the best particle over the steps with ground truth.
    pub fn mean_error(&self) -> Option<(f64, f64, f64)> {
        let errors: Vec<(f64, f64, f64)> = self
            .steps
            .iter()
            .filter_map(|s| Some((s.error_x?, s.error_y?, s.error_theta?)))
            .collect();
        if errors.is_empty() {
            return None;
        }
        let n = errors.len() as f64;
        let sum = errors
            .iter()
            .fold((0.0, 0.0, 0.0), |acc, e| (acc.0 + e.0, acc.1 + e.1, acc.2 + e.2));
        Some((sum.0 / n, sum.1 / n, sum.2 / n))
    }
    /// Number of cycles in which every weight was zero
    pub fn degenerate_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.degenerate).count()
    }
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for step in &self.steps {
            writer.serialize(step)?;
        }
        writer.flush()?;
        Ok(())
    }
    pub fn from_csv<P: AsRef<Path>>(path: P, name: &str) -> Result<Self, Box<dyn Error>> {
        Ok(LocalizationResult {
            name: name.to_string(),
            steps: read_records(path)?,
        })
    }
}

/// Replay a scenario through a fresh particle filter.
///
/// Step 0 initializes the filter around `initial_pose`; every later step predicts with its control first.
/// Each step then weights the particles against that step's observations and resamples. The best particle
/// is read after resampling.
pub fn run_localization(
    config: &SimulationConfig,
    map: &Map,
    scenario: &ScenarioData,
    initial_pose: Pose2D,
) -> Result<LocalizationResult, FilterError> {
    config.validate()?;
    let mut pf = ParticleFilter::new(config.filter.clone())?;
    let mut result = LocalizationResult::new("Monte Carlo Localization");
    result.steps.reserve(scenario.len());
    for (k, step) in scenario.steps.iter().enumerate() {
        if k == 0 {
            pf.init(initial_pose.x, initial_pose.y, initial_pose.theta, config.initial_std)?;
        } else {
            pf.prediction(step.dt, config.process_std, &step.control)?;
        }
        pf.update_weights(config.sensor_range, config.landmark_std, &step.observations, map)?;
        let outcome = pf.resample()?;
        let best = pf.best_particle().ok_or(FilterError::NotInitialized)?;
        let record = AssociationRecord::from_particle(best);
        let estimate = pf.estimate()?;
        debug!(
            "Step {}: best {} ess {:.1} {:?}",
            k,
            best.pose(),
            estimate.effective_sample_size,
            outcome
        );
        result.steps.push(StepResult::new(
            k,
            &best.pose(),
            &record,
            &estimate,
            outcome,
            step.ground_truth,
        ));
    }
    if let Some((ex, ey, etheta)) = result.mean_error() {
        info!(
            "Localized {} steps: mean error x {:.4} m, y {:.4} m, theta {:.4} rad, {} degenerate",
            result.steps.len(),
            ex,
            ey,
            etheta,
            result.degenerate_steps()
        );
    } else {
        info!(
            "Localized {} steps without ground truth, {} degenerate",
            result.steps.len(),
            result.degenerate_steps()
        );
    }
    Ok(result)
}

/// Parameters of a synthetic scenario.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub num_steps: usize,
    pub dt: f64,
    pub start: Pose2D,
    /// True commanded control, held constant
    pub control: Control,
    /// Standard deviations (velocity, yaw rate) of the noise on the reported control
    pub control_noise_std: [f64; 2],
    /// Standard deviations (x, y) of the noise on each vehicle-frame detection
    pub observation_noise_std: [f64; 2],
    /// Landmarks farther than this from the true pose are not observed
    pub sensor_range: f64,
    pub seed: u64,
}
impl Default for ScenarioParams {
    fn default() -> Self {
        ScenarioParams {
            num_steps: 100,
            dt: 0.1,
            start: Pose2D::default(),
            control: Control::new(5.0, 0.1),
            control_noise_std: [0.05, 0.005],
            observation_noise_std: [0.1, 0.1],
            sensor_range: 50.0,
            seed: 42,
        }
    }
}

/// Square grid of `size` × `size` landmarks centred on the origin, ids starting at 1.
pub fn grid_map(size: usize, spacing: f64) -> Map {
    let offset = size.saturating_sub(1) as f64 * spacing / 2.0;
    let mut landmarks = Vec::with_capacity(size * size);
    for i in 0..size {
        for j in 0..size {
            landmarks.push(Landmark::new(
                (i * size + j + 1) as u32,
                i as f64 * spacing - offset,
                j as f64 * spacing - offset,
            ));
        }
    }
    Map::from_landmarks(landmarks)
}

/// Generate a synthetic scenario on `map`.
///
/// The true trajectory follows `params.control` exactly. The reported controls and the detections of every
/// landmark within `params.sensor_range` of the true pose are corrupted with Gaussian noise.
pub fn generate_scenario(map: &Map, params: &ScenarioParams) -> Result<ScenarioData, FilterError> {
    let velocity_noise = normal("control velocity", params.control_noise_std[0])?;
    let yaw_rate_noise = normal("control yaw rate", params.control_noise_std[1])?;
    let obs_x_noise = normal("observation x", params.observation_noise_std[0])?;
    let obs_y_noise = normal("observation y", params.observation_noise_std[1])?;
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut truth = params.start;
    let mut steps = Vec::with_capacity(params.num_steps);
    for k in 0..params.num_steps {
        if k > 0 {
            truth = predict_pose(
                &truth,
                &params.control,
                params.dt,
                crate::motion::DEFAULT_YAW_RATE_THRESHOLD,
            );
        }
        let to_vehicle = Rotation2::new(-truth.theta);
        let observations = map
            .iter()
            .filter(|l| (l.position() - truth.position()).norm() <= params.sensor_range)
            .map(|l| {
                let local: Vector2<f64> = to_vehicle * (l.position() - truth.position());
                LandmarkObservation::new(
                    local[0] + obs_x_noise.sample(&mut rng),
                    local[1] + obs_y_noise.sample(&mut rng),
                )
            })
            .collect();
        let control = Control::new(
            params.control.velocity + velocity_noise.sample(&mut rng),
            params.control.yaw_rate + yaw_rate_noise.sample(&mut rng),
        );
        steps.push(ScenarioStep {
            dt: params.dt,
            control,
            observations,
            ground_truth: Some(truth),
        });
    }
    Ok(ScenarioData { steps })
}

fn normal(name: &'static str, std: f64) -> Result<Normal<f64>, FilterError> {
    let std = crate::error::check_noise_std(name, std)?;
    Normal::new(0.0, std).map_err(|_| FilterError::InvalidStdDev { name, value: std })
}
