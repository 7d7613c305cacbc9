//! Particle filter for landmark-based localization.
//!
//! [`ParticleFilter`] owns the particle set, a parallel weight cache and its own seeded random number
//! generator. One localization cycle is `prediction` → `update_weights` → `resample`; `init` must be called
//! exactly once before the first cycle.
use crate::config::FilterConfig;
use crate::error::{FilterError, check_noise_std};
use crate::map::Map;
use crate::measurements::{LandmarkObservation, ObservationModel};
use crate::motion::predict_pose;
use crate::{Control, Pose2D};

use log::{debug, info, trace, warn};
use nalgebra::{Matrix3, Vector3};
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

/// One pose hypothesis and its belief weight.
///
/// `associations`, `sense_x` and `sense_y` are parallel diagnostic lists filled by the most recent weight
/// update (when recording is enabled): the landmark each observation was paired with and the map-frame
/// coordinates of that observation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    /// Index assigned at initialization. Copied along on resampling, so it is not a persistent identity.
    pub id: usize,
    pub x: f64,
    pub y: f64,
    /// Heading in radians, unbounded
    pub theta: f64,
    pub weight: f64,
    pub associations: Vec<u32>,
    pub sense_x: Vec<f64>,
    pub sense_y: Vec<f64>,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("theta", &self.theta)
            .field("weight", &self.weight)
            .field("associations", &self.associations.len())
            .finish()
    }
}
impl Particle {
    pub fn new(id: usize, pose: Pose2D, weight: f64) -> Particle {
        Particle {
            id,
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
            weight,
            ..Particle::default()
        }
    }
    pub fn pose(&self) -> Pose2D {
        Pose2D::new(self.x, self.y, self.theta)
    }
    pub fn set_pose(&mut self, pose: Pose2D) {
        self.x = pose.x;
        self.y = pose.y;
        self.theta = pose.theta;
    }
}

/// How the cloud is collapsed into a single pose estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum AveragingStrategy {
    /// Weight-averaged pose. Falls back to the unweighted mean when every weight is zero.
    #[default]
    WeightedAverage,
    UnweightedAverage,
    /// Pose of the highest-weight particle
    HighestWeight,
}

/// Scheme used to draw the surviving particle indices.
///
/// All schemes select index `i` with probability proportional to `weights[i]` and leave the weight values
/// themselves untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum ResamplingStrategy {
    /// Independent categorical draws with replacement
    #[default]
    Multinomial,
    /// One uniform offset, evenly spaced pointers (low variance)
    Systematic,
    /// One uniform draw inside each of the evenly spaced strata
    Stratified,
}
impl ResamplingStrategy {
    /// Draw `count` indices into `weights`.
    ///
    /// The weights are first divided by their largest entry (see [`scale_by_max`]), so vectors whose sum
    /// overflows still draw in proportion. Returns `None` only when no weight is positive.
    pub fn draw_indices<R: Rng + ?Sized>(
        &self,
        weights: &[f64],
        count: usize,
        rng: &mut R,
    ) -> Option<Vec<usize>> {
        let weights = scale_by_max(weights)?;
        let total: f64 = weights.iter().sum();
        match self {
            ResamplingStrategy::Multinomial => {
                let distribution = WeightedIndex::new(&weights).ok()?;
                Some((0..count).map(|_| distribution.sample(rng)).collect())
            }
            ResamplingStrategy::Systematic => {
                let step = total / count as f64;
                let offset = rng.random::<f64>() * step;
                let positions = (0..count).map(|k| offset + k as f64 * step);
                Some(walk_cumulative(&weights, positions))
            }
            ResamplingStrategy::Stratified => {
                let step = total / count as f64;
                let positions: Vec<f64> = (0..count)
                    .map(|k| (k as f64 + rng.random::<f64>()) * step)
                    .collect();
                Some(walk_cumulative(&weights, positions))
            }
        }
    }
}

/// Weights divided by their largest entry, so every value lies in `[0, 1]` and the sum stays finite.
///
/// Infinite weights (an overflowed likelihood product) share the mass equally and NaN counts as zero.
/// `None` when no weight is positive.
pub fn scale_by_max(weights: &[f64]) -> Option<Vec<f64>> {
    let max = weights
        .iter()
        .cloned()
        .filter(|w| !w.is_nan())
        .fold(0.0, f64::max);
    if !(max > 0.0) {
        return None;
    }
    Some(
        weights
            .iter()
            .map(|&w| {
                if !(w > 0.0) {
                    0.0
                } else if max.is_infinite() {
                    if w.is_infinite() { 1.0 } else { 0.0 }
                } else {
                    w / max
                }
            })
            .collect(),
    )
}

/// Map sorted positions in `[0, total)` onto the cumulative weight sum.
fn walk_cumulative<I: IntoIterator<Item = f64>>(weights: &[f64], positions: I) -> Vec<usize> {
    // Rounding in the running sum must never land on a zero-weight tail particle.
    let last_positive = weights.iter().rposition(|&w| w > 0.0).unwrap_or(0);
    let mut indices = Vec::with_capacity(weights.len());
    let mut i = 0;
    let mut cumulative = weights[0];
    for position in positions {
        while position >= cumulative && i < last_positive {
            i += 1;
            cumulative += weights[i];
        }
        indices.push(i);
    }
    indices
}

/// Behaviour of [`ParticleFilter::resample`] when every weight is zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum DegeneratePolicy {
    /// Draw the new set uniformly from the current particles
    #[default]
    Uniform,
    /// Keep the current particle set untouched
    KeepPrior,
    /// Report [`FilterError::DegenerateWeights`]
    Fail,
}

/// What a call to [`ParticleFilter::resample`] actually did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResampleOutcome {
    /// Indices drawn in proportion to weight
    Resampled,
    /// All weights were zero; indices drawn uniformly
    UniformFallback,
    /// All weights were zero; the particle set was left unchanged
    KeptPrior,
}
impl ResampleOutcome {
    /// Whether the weights carried no information this cycle
    pub fn is_degenerate(&self) -> bool {
        !matches!(self, ResampleOutcome::Resampled)
    }
}

/// Summary of the particle cloud.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseEstimate {
    pub pose: Pose2D,
    /// Spread of the particles around `pose` (x, y, theta), zero for [`AveragingStrategy::HighestWeight`]
    pub covariance: Matrix3<f64>,
    pub effective_sample_size: f64,
    pub strategy: AveragingStrategy,
}

pub struct ParticleFilter {
    config: FilterConfig,
    particles: Vec<Particle>,
    weights: Vec<f64>,
    is_initialized: bool,
    rng: StdRng,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self.weights.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_weight = self.weights.iter().cloned().fold(0.0, f64::max);
        f.debug_struct("ParticleFilter")
            .field("initialized", &self.is_initialized)
            .field("num_particles", &self.particles.len())
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field("resampling_strategy", &self.config.resampling_strategy)
            .finish()
    }
}
impl ParticleFilter {
    /// Create an uninitialized filter. The generator is seeded from `config.seed`, or from the operating
    /// system when no seed is given.
    pub fn new(config: FilterConfig) -> Result<Self, FilterError> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(config, rng)
    }
    /// Create an uninitialized filter that draws from the given generator.
    pub fn with_rng(config: FilterConfig, rng: StdRng) -> Result<Self, FilterError> {
        config.validate()?;
        Ok(ParticleFilter {
            particles: Vec::with_capacity(config.num_particles),
            weights: Vec::with_capacity(config.num_particles),
            config,
            is_initialized: false,
            rng,
        })
    }
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }
    pub fn num_particles(&self) -> usize {
        self.config.num_particles
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    /// Weight cache used to drive resampling
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
    /// Whether the weight cache matches every particle's own weight
    pub fn weights_in_sync(&self) -> bool {
        self.weights.len() == self.particles.len()
            && self
                .particles
                .iter()
                .zip(self.weights.iter())
                .all(|(p, &w)| p.weight == w)
    }
    fn ensure_initialized(&self) -> Result<(), FilterError> {
        if self.is_initialized {
            Ok(())
        } else {
            Err(FilterError::NotInitialized)
        }
    }
    /// Seed the particle set around a prior pose.
    ///
    /// Each particle is an independent draw from `Normal(x, std[0]) × Normal(y, std[1]) × Normal(theta, std[2])`
    /// with weight 1.0 and id equal to its index. A second call is rejected and leaves the set untouched.
    pub fn init(&mut self, x: f64, y: f64, theta: f64, std: [f64; 3]) -> Result<(), FilterError> {
        if self.is_initialized {
            return Err(FilterError::AlreadyInitialized);
        }
        let [dist_x, dist_y, dist_theta] = pose_noise(["initial x", "initial y", "initial theta"], std)?;
        let n = self.config.num_particles;
        self.particles.clear();
        self.weights.clear();
        for id in 0..n {
            let pose = Pose2D::new(
                x + dist_x.sample(&mut self.rng),
                y + dist_y.sample(&mut self.rng),
                theta + dist_theta.sample(&mut self.rng),
            );
            self.particles.push(Particle::new(id, pose, 1.0));
            self.weights.push(1.0);
        }
        self.is_initialized = true;
        info!(
            "Initialized {} particles around ({:.3}, {:.3}, {:.3}) with std {:?}",
            n, x, y, theta, std
        );
        Ok(())
    }
    /// Move every particle with the kinematic model and add independent Gaussian process noise.
    ///
    /// # Arguments
    /// * `dt` - Elapsed time in seconds
    /// * `std_pos` - Process noise standard deviations (x, y, theta)
    /// * `control` - Commanded velocity and yaw rate
    pub fn prediction(
        &mut self,
        dt: f64,
        std_pos: [f64; 3],
        control: &Control,
    ) -> Result<(), FilterError> {
        self.ensure_initialized()?;
        let [dist_x, dist_y, dist_theta] = pose_noise(["process x", "process y", "process theta"], std_pos)?;
        let threshold = self.config.yaw_rate_threshold;
        for particle in &mut self.particles {
            let predicted = predict_pose(&particle.pose(), control, dt, threshold);
            particle.set_pose(Pose2D::new(
                predicted.x + dist_x.sample(&mut self.rng),
                predicted.y + dist_y.sample(&mut self.rng),
                predicted.theta + dist_theta.sample(&mut self.rng),
            ));
        }
        trace!("Predicted {} particles with {} over {} s", self.particles.len(), control, dt);
        Ok(())
    }
    /// Re-weight every particle against the current observations.
    ///
    /// Each particle's weight becomes the product of the per-observation likelihoods computed under its own
    /// pose, or exactly zero when one observation's nearest landmark lies beyond `sensor_range`.
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        std_landmark: [f64; 2],
        observations: &[LandmarkObservation],
        map: &Map,
    ) -> Result<(), FilterError> {
        self.ensure_initialized()?;
        let model = ObservationModel::new(sensor_range, std_landmark)?;
        let record = self.config.record_associations;
        let mut rejected = 0usize;
        for (particle, cached) in self.particles.iter_mut().zip(self.weights.iter_mut()) {
            let likelihood = model.weigh(&particle.pose(), observations, map, record);
            if likelihood.rejected {
                rejected += 1;
                trace!("Particle {} has an observation beyond sensor range", particle.id);
            }
            particle.weight = likelihood.weight;
            *cached = likelihood.weight;
            if record {
                particle.associations = likelihood
                    .associations
                    .iter()
                    .map(|a| a.landmark_id)
                    .collect();
                particle.sense_x = likelihood.associations.iter().map(|a| a.map_point[0]).collect();
                particle.sense_y = likelihood.associations.iter().map(|a| a.map_point[1]).collect();
            }
        }
        debug!(
            "Weighted {} particles against {} observations, {} rejected by range",
            self.particles.len(),
            observations.len(),
            rejected
        );
        Ok(())
    }
    /// Replace the particle set by drawing with replacement in proportion to weight.
    ///
    /// Copies keep their weight and diagnostics; the weight cache is refreshed from the new set. When every
    /// weight is zero the configured [`DegeneratePolicy`] decides the outcome.
    pub fn resample(&mut self) -> Result<ResampleOutcome, FilterError> {
        self.ensure_initialized()?;
        let n = self.particles.len();
        let (indices, outcome) = match self
            .config
            .resampling_strategy
            .draw_indices(&self.weights, n, &mut self.rng)
        {
            Some(indices) => (indices, ResampleOutcome::Resampled),
            None => match self.config.degenerate_policy {
                DegeneratePolicy::Uniform => {
                    warn!("All {} particle weights are zero; resampling uniformly", n);
                    let indices: Vec<usize> = (0..n).map(|_| self.rng.random_range(0..n)).collect();
                    (indices, ResampleOutcome::UniformFallback)
                }
                DegeneratePolicy::KeepPrior => {
                    warn!("All {} particle weights are zero; keeping the prior particle set", n);
                    return Ok(ResampleOutcome::KeptPrior);
                }
                DegeneratePolicy::Fail => {
                    return Err(FilterError::DegenerateWeights { num_particles: n });
                }
            },
        };
        self.particles = indices.into_iter().map(|i| self.particles[i].clone()).collect();
        self.weights = self.particles.iter().map(|p| p.weight).collect();
        Ok(outcome)
    }
    /// Overwrite all particle weights (and the cache) at once.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<(), FilterError> {
        self.ensure_initialized()?;
        if weights.len() != self.particles.len() {
            return Err(FilterError::InvalidWeights(format!(
                "expected {} weights, got {}",
                self.particles.len(),
                weights.len()
            )));
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(FilterError::InvalidWeights(format!(
                "weights must be finite and non-negative, got {}",
                bad
            )));
        }
        for (particle, &w) in self.particles.iter_mut().zip(weights.iter()) {
            particle.weight = w;
        }
        self.weights = weights.to_vec();
        Ok(())
    }
    /// Highest-weight particle; the first one wins a tie. `None` before initialization.
    pub fn best_particle(&self) -> Option<&Particle> {
        self.particles.iter().reduce(|best, p| if p.weight > best.weight { p } else { best })
    }
    /// Effective sample size `(Σw)² / Σw²`, or zero when every weight is zero.
    pub fn effective_sample_size(&self) -> f64 {
        match scale_by_max(&self.weights) {
            Some(scaled) => {
                let sum: f64 = scaled.iter().sum();
                let sum_of_squares: f64 = scaled.iter().map(|w| w * w).sum();
                sum * sum / sum_of_squares
            }
            None => 0.0,
        }
    }
    /// Collapse the particle cloud into a single pose using the configured [`AveragingStrategy`].
    ///
    /// Headings are averaged arithmetically, consistent with the unwrapped heading convention.
    pub fn estimate(&self) -> Result<PoseEstimate, FilterError> {
        self.ensure_initialized()?;
        let strategy = self.config.averaging_strategy;
        let (pose, covariance) = match strategy {
            AveragingStrategy::HighestWeight => {
                let best = self.best_particle().ok_or(FilterError::NotInitialized)?;
                (best.pose(), Matrix3::zeros())
            }
            AveragingStrategy::WeightedAverage => match scale_by_max(&self.weights) {
                Some(scaled) => weighted_moments(&self.particles, &scaled),
                None => weighted_moments(&self.particles, &vec![1.0; self.particles.len()]),
            },
            AveragingStrategy::UnweightedAverage => {
                weighted_moments(&self.particles, &vec![1.0; self.particles.len()])
            }
        };
        Ok(PoseEstimate {
            pose,
            covariance,
            effective_sample_size: self.effective_sample_size(),
            strategy,
        })
    }
}

fn pose_noise(names: [&'static str; 3], std: [f64; 3]) -> Result<[Normal<f64>; 3], FilterError> {
    let mut distributions = Vec::with_capacity(3);
    for (name, sigma) in names.into_iter().zip(std) {
        let sigma = check_noise_std(name, sigma)?;
        let normal = Normal::new(0.0, sigma)
            .map_err(|_| FilterError::InvalidStdDev { name, value: sigma })?;
        distributions.push(normal);
    }
    Ok([distributions[0], distributions[1], distributions[2]])
}

/// Weighted mean and covariance of the particle poses. `weights` must be finite with a positive sum.
fn weighted_moments(particles: &[Particle], weights: &[f64]) -> (Pose2D, Matrix3<f64>) {
    let total: f64 = weights.iter().sum();
    let mut mean = Vector3::<f64>::zeros();
    for (particle, &w) in particles.iter().zip(weights) {
        mean += w / total * Vector3::new(particle.x, particle.y, particle.theta);
    }
    let mut covariance = Matrix3::<f64>::zeros();
    for (particle, &w) in particles.iter().zip(weights) {
        let diff = Vector3::new(particle.x, particle.y, particle.theta) - mean;
        covariance += w / total * diff * diff.transpose();
    }
    (Pose2D::new(mean[0], mean[1], mean[2]), covariance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Landmark;
    use crate::measurements::gaussian_likelihood;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn seeded_config(num_particles: usize, seed: u64) -> FilterConfig {
        FilterConfig {
            num_particles,
            seed: Some(seed),
            ..FilterConfig::default()
        }
    }

    fn initialized_filter(num_particles: usize, seed: u64) -> ParticleFilter {
        let mut pf = ParticleFilter::new(seeded_config(num_particles, seed)).unwrap();
        pf.init(0.0, 0.0, 0.0, [0.0, 0.0, 0.0]).unwrap();
        pf
    }

    fn mean_and_variance(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        (mean, variance)
    }

    #[test]
    fn init_draws_from_prior() {
        let mut pf = ParticleFilter::new(seeded_config(20_000, 1)).unwrap();
        pf.init(4.0, -2.0, 0.5, [2.0, 0.5, 0.1]).unwrap();
        let xs: Vec<f64> = pf.particles().iter().map(|p| p.x).collect();
        let ys: Vec<f64> = pf.particles().iter().map(|p| p.y).collect();
        let thetas: Vec<f64> = pf.particles().iter().map(|p| p.theta).collect();
        let (mean_x, var_x) = mean_and_variance(&xs);
        let (mean_y, var_y) = mean_and_variance(&ys);
        let (mean_theta, var_theta) = mean_and_variance(&thetas);
        assert_approx_eq!(mean_x, 4.0, 0.05);
        assert_approx_eq!(mean_y, -2.0, 0.02);
        assert_approx_eq!(mean_theta, 0.5, 0.005);
        assert_approx_eq!(var_x, 4.0, 0.2);
        assert_approx_eq!(var_y, 0.25, 0.0125);
        assert_approx_eq!(var_theta, 0.01, 0.0005);
    }

    #[test]
    fn init_assigns_sequential_ids_and_unit_weights() {
        let mut pf = ParticleFilter::new(FilterConfig::default()).unwrap();
        assert!(!pf.is_initialized());
        pf.init(1.0, 2.0, 3.0, [0.3, 0.3, 0.01]).unwrap();
        assert!(pf.is_initialized());
        assert_eq!(pf.particles().len(), 100);
        for (i, particle) in pf.particles().iter().enumerate() {
            assert_eq!(particle.id, i);
            assert_eq!(particle.weight, 1.0);
        }
        assert!(pf.weights().iter().all(|&w| w == 1.0));
        assert!(pf.weights_in_sync());
    }

    #[test]
    fn second_init_is_rejected() {
        let mut pf = initialized_filter(10, 2);
        let before = pf.particles().to_vec();
        assert_eq!(
            pf.init(100.0, 100.0, 1.0, [1.0, 1.0, 1.0]),
            Err(FilterError::AlreadyInitialized)
        );
        assert_eq!(pf.particles(), before.as_slice());
    }

    #[test]
    fn operations_before_init_fail() {
        let mut pf = ParticleFilter::new(seeded_config(10, 3)).unwrap();
        let map = Map::from_landmarks(vec![Landmark::new(1, 0.0, 0.0)]);
        assert_eq!(
            pf.prediction(0.1, [0.0; 3], &Control::new(1.0, 0.0)),
            Err(FilterError::NotInitialized)
        );
        assert_eq!(
            pf.update_weights(50.0, [0.3, 0.3], &[], &map),
            Err(FilterError::NotInitialized)
        );
        assert_eq!(pf.resample(), Err(FilterError::NotInitialized));
        assert!(pf.estimate().is_err());
        assert!(pf.best_particle().is_none());
    }

    #[test]
    fn invalid_noise_is_rejected() {
        let mut pf = ParticleFilter::new(seeded_config(10, 4)).unwrap();
        assert!(matches!(
            pf.init(0.0, 0.0, 0.0, [-1.0, 0.0, 0.0]),
            Err(FilterError::InvalidStdDev { .. })
        ));
        assert!(!pf.is_initialized());
        pf.init(0.0, 0.0, 0.0, [0.0; 3]).unwrap();
        assert!(matches!(
            pf.prediction(0.1, [0.1, f64::NAN, 0.1], &Control::new(1.0, 0.0)),
            Err(FilterError::InvalidStdDev { .. })
        ));
    }

    #[test]
    fn prediction_without_noise_is_kinematic() {
        let mut pf = initialized_filter(5, 5);
        pf.prediction(1.0, [0.0; 3], &Control::new(2.0, 0.0)).unwrap();
        for particle in pf.particles() {
            assert_eq!(particle.pose(), Pose2D::new(2.0, 0.0, 0.0));
        }

        let mut pf = initialized_filter(5, 6);
        pf.prediction(1.0, [0.0; 3], &Control::new(1.0, FRAC_PI_2)).unwrap();
        let radius = 1.0 / FRAC_PI_2;
        for particle in pf.particles() {
            assert_approx_eq!(particle.x, radius, 1e-12);
            assert_approx_eq!(particle.y, radius, 1e-12);
            assert_approx_eq!(particle.theta, FRAC_PI_2, 1e-12);
        }
    }

    #[test]
    fn prediction_noise_is_independent_per_particle() {
        let mut pf = initialized_filter(1_000, 7);
        pf.prediction(0.1, [0.3, 0.3, 0.01], &Control::new(10.0, 0.0)).unwrap();
        let xs: Vec<f64> = pf.particles().iter().map(|p| p.x).collect();
        let (mean_x, var_x) = mean_and_variance(&xs);
        assert_approx_eq!(mean_x, 1.0, 0.05);
        assert_approx_eq!(var_x, 0.09, 0.015);
        let first = &pf.particles()[0];
        assert!(pf.particles()[1..].iter().any(|p| p.x != first.x));
    }

    #[test]
    fn heading_accumulates_without_wrapping() {
        let mut pf = initialized_filter(3, 8);
        for _ in 0..10 {
            pf.prediction(1.0, [0.0; 3], &Control::new(0.0, PI)).unwrap();
        }
        for particle in pf.particles() {
            assert_approx_eq!(particle.theta, 10.0 * PI, 1e-9);
        }
    }

    #[test]
    fn update_weights_keeps_cache_in_sync_and_records_associations() {
        let mut pf = ParticleFilter::new(seeded_config(50, 9)).unwrap();
        pf.init(2.0, 1.0, 0.1, [0.2, 0.2, 0.02]).unwrap();
        let map = Map::from_landmarks(vec![
            Landmark::new(1, 5.0, 3.0),
            Landmark::new(2, 2.0, -4.0),
            Landmark::new(3, -3.0, 6.0),
        ]);
        let observations = [
            LandmarkObservation::new(2.9, 2.3),
            LandmarkObservation::new(-0.4, -5.0),
        ];
        pf.update_weights(50.0, [0.3, 0.3], &observations, &map).unwrap();
        assert!(pf.weights_in_sync());
        for particle in pf.particles() {
            assert_eq!(particle.associations, vec![1, 2]);
            assert_eq!(particle.sense_x.len(), 2);
            assert_eq!(particle.sense_y.len(), 2);
            let expected_x = particle.x + particle.theta.cos() * 2.9 - particle.theta.sin() * 2.3;
            assert_approx_eq!(particle.sense_x[0], expected_x, 1e-12);
        }
    }

    #[test]
    fn association_recording_can_be_disabled() {
        let config = FilterConfig {
            record_associations: false,
            ..seeded_config(5, 10)
        };
        let mut pf = ParticleFilter::new(config).unwrap();
        pf.init(0.0, 0.0, 0.0, [0.0; 3]).unwrap();
        let map = Map::from_landmarks(vec![Landmark::new(1, 1.0, 0.0)]);
        pf.update_weights(50.0, [0.3, 0.3], &[LandmarkObservation::new(1.0, 0.0)], &map)
            .unwrap();
        assert!(pf.particles().iter().all(|p| p.associations.is_empty()));
    }

    #[test]
    fn out_of_range_particle_gets_zero_weight() {
        let mut pf = initialized_filter(4, 11);
        let map = Map::from_landmarks(vec![Landmark::new(1, 1.0, 0.0), Landmark::new(2, 100.0, 0.0)]);
        // The second observation lands 49 m from the nearest landmark.
        let observations = [
            LandmarkObservation::new(1.0, 0.0),
            LandmarkObservation::new(50.0, 0.0),
        ];
        pf.update_weights(20.0, [0.3, 0.3], &observations, &map).unwrap();
        assert!(pf.particles().iter().all(|p| p.weight == 0.0));
        assert!(pf.weights().iter().all(|&w| w == 0.0));
        assert!(pf.particles().iter().all(|p| p.associations == vec![1]));
    }

    #[test]
    fn resample_frequencies_follow_weights() {
        let mut pf = initialized_filter(1_000, 12);
        let weights: Vec<f64> = (0..1_000).map(|i| if i < 500 { 3.0 } else { 1.0 }).collect();
        pf.set_weights(&weights).unwrap();
        assert_eq!(pf.resample(), Ok(ResampleOutcome::Resampled));
        let heavy = pf.particles().iter().filter(|p| p.id < 500).count() as f64 / 1_000.0;
        assert_approx_eq!(heavy, 0.75, 0.05);
        assert!(pf.weights_in_sync());
        // Survivors keep their weights.
        for particle in pf.particles() {
            let expected = if particle.id < 500 { 3.0 } else { 1.0 };
            assert_eq!(particle.weight, expected);
        }
    }

    #[test]
    fn every_strategy_draws_proportionally() {
        let weights = [1.0, 2.0, 0.0, 3.0, 4.0];
        let total: f64 = weights.iter().sum();
        for strategy in [
            ResamplingStrategy::Multinomial,
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Stratified,
        ] {
            let mut rng = StdRng::seed_from_u64(13);
            let mut counts = [0usize; 5];
            let rounds = 20_000;
            for _ in 0..rounds {
                for i in strategy.draw_indices(&weights, weights.len(), &mut rng).unwrap() {
                    counts[i] += 1;
                }
            }
            let draws = (rounds * weights.len()) as f64;
            assert_eq!(counts[2], 0, "{:?} drew a zero-weight index", strategy);
            for (count, weight) in counts.iter().zip(weights.iter()) {
                assert_approx_eq!(*count as f64 / draws, weight / total, 0.01);
            }
        }
    }

    #[test]
    fn degenerate_weights_have_no_distribution() {
        let mut rng = StdRng::seed_from_u64(14);
        for strategy in [
            ResamplingStrategy::Multinomial,
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Stratified,
        ] {
            assert!(strategy.draw_indices(&[0.0, 0.0, 0.0], 3, &mut rng).is_none());
        }
    }

    #[test]
    fn degenerate_policies() {
        let zeros = vec![0.0; 20];

        let mut pf = initialized_filter(20, 15);
        pf.set_weights(&zeros).unwrap();
        let outcome = pf.resample().unwrap();
        assert_eq!(outcome, ResampleOutcome::UniformFallback);
        assert!(outcome.is_degenerate());
        assert_eq!(pf.particles().len(), 20);
        assert!(pf.weights_in_sync());

        let config = FilterConfig {
            degenerate_policy: DegeneratePolicy::KeepPrior,
            ..seeded_config(20, 16)
        };
        let mut pf = ParticleFilter::new(config).unwrap();
        pf.init(0.0, 0.0, 0.0, [1.0, 1.0, 0.1]).unwrap();
        pf.set_weights(&zeros).unwrap();
        let before = pf.particles().to_vec();
        assert_eq!(pf.resample(), Ok(ResampleOutcome::KeptPrior));
        assert_eq!(pf.particles(), before.as_slice());

        let config = FilterConfig {
            degenerate_policy: DegeneratePolicy::Fail,
            ..seeded_config(20, 17)
        };
        let mut pf = ParticleFilter::new(config).unwrap();
        pf.init(0.0, 0.0, 0.0, [1.0, 1.0, 0.1]).unwrap();
        pf.set_weights(&zeros).unwrap();
        assert_eq!(
            pf.resample(),
            Err(FilterError::DegenerateWeights { num_particles: 20 })
        );
        assert!(pf.weights_in_sync());
    }

    #[test]
    fn set_weights_validates_input() {
        let mut pf = initialized_filter(3, 18);
        assert!(pf.set_weights(&[1.0, 2.0]).is_err());
        assert!(pf.set_weights(&[1.0, -2.0, 1.0]).is_err());
        assert!(pf.set_weights(&[1.0, f64::INFINITY, 1.0]).is_err());
        assert!(pf.set_weights(&[1.0, 2.0, 3.0]).is_ok());
    }

    #[test]
    fn single_particle_end_to_end() {
        let mut pf = ParticleFilter::new(seeded_config(1, 19)).unwrap();
        pf.init(4.0, 5.0, 0.0, [0.0; 3]).unwrap();
        pf.prediction(1.0, [0.0; 3], &Control::new(2.0, 0.0)).unwrap();
        assert_eq!(pf.particles()[0].pose(), Pose2D::new(6.0, 5.0, 0.0));

        let map = Map::from_landmarks(vec![Landmark::new(1, 10.0, 10.0)]);
        pf.update_weights(50.0, [0.3, 0.3], &[LandmarkObservation::new(4.0, 5.0)], &map)
            .unwrap();
        let expected = 1.0 / (2.0 * PI * 0.3 * 0.3);
        assert_approx_eq!(pf.particles()[0].weight, expected, 1e-9);
        let before = pf.particles()[0].clone();

        assert_eq!(pf.resample(), Ok(ResampleOutcome::Resampled));
        assert_eq!(pf.particles().len(), 1);
        assert_eq!(pf.particles()[0], before);
        assert!(pf.weights_in_sync());
    }

    #[test]
    fn best_particle_prefers_first_on_ties() {
        let mut pf = initialized_filter(4, 20);
        pf.set_weights(&[0.5, 2.0, 2.0, 1.0]).unwrap();
        assert_eq!(pf.best_particle().unwrap().id, 1);
    }

    #[test]
    fn estimate_strategies() {
        let config = FilterConfig {
            averaging_strategy: AveragingStrategy::WeightedAverage,
            ..seeded_config(2, 21)
        };
        let mut pf = ParticleFilter::new(config).unwrap();
        pf.init(0.0, 0.0, 0.0, [0.0; 3]).unwrap();
        let map = Map::from_landmarks(vec![Landmark::new(1, 1.0, 0.0)]);
        pf.update_weights(10.0, [1.0, 1.0], &[LandmarkObservation::new(1.0, 0.0)], &map)
            .unwrap();
        let estimate = pf.estimate().unwrap();
        assert_eq!(estimate.pose, Pose2D::new(0.0, 0.0, 0.0));
        assert_approx_eq!(estimate.effective_sample_size, 2.0, 1e-12);
        assert_approx_eq!(
            pf.weights()[0],
            gaussian_likelihood(0.0, 0.0, 1.0, 1.0),
            1e-12
        );

        let mut pf = initialized_filter(2, 22);
        pf.set_weights(&[1.0, 3.0]).unwrap();
        assert_eq!(pf.estimate().unwrap().pose, Pose2D::default());
        assert_approx_eq!(pf.effective_sample_size(), 16.0 / 10.0, 1e-12);
    }

    #[test]
    fn weighted_moments_match_hand_computation() {
        let particles = vec![
            Particle::new(0, Pose2D::new(0.0, 0.0, 0.0), 1.0),
            Particle::new(1, Pose2D::new(4.0, 2.0, 1.0), 3.0),
        ];
        let (pose, covariance) = weighted_moments(&particles, &[1.0, 3.0]);
        assert_approx_eq!(pose.x, 3.0, 1e-12);
        assert_approx_eq!(pose.y, 1.5, 1e-12);
        assert_approx_eq!(pose.theta, 0.75, 1e-12);
        // Var(x) = 0.25 * 9 + 0.75 * 1
        assert_approx_eq!(covariance[(0, 0)], 3.0, 1e-12);

        let (pose, _) = weighted_moments(&particles, &[1.0, 1.0]);
        assert_approx_eq!(pose.x, 2.0, 1e-12);
    }

    #[test]
    fn scale_by_max_keeps_proportions() {
        let scaled = scale_by_max(&[2.0, 8.0, 0.0]).unwrap();
        assert_eq!(scaled, vec![0.25, 1.0, 0.0]);
        assert_eq!(scale_by_max(&[f64::INFINITY, 5.0, f64::INFINITY]).unwrap(), vec![1.0, 0.0, 1.0]);
        assert_eq!(scale_by_max(&[f64::NAN, 4.0]).unwrap(), vec![0.0, 1.0]);
        assert!(scale_by_max(&[0.0, 0.0]).is_none());
        assert!(scale_by_max(&[]).is_none());
    }

    #[test]
    fn huge_weights_are_not_degenerate() {
        let config = FilterConfig {
            degenerate_policy: DegeneratePolicy::Fail,
            ..seeded_config(3, 25)
        };
        let mut pf = ParticleFilter::new(config).unwrap();
        pf.init(0.0, 0.0, 0.0, [1.0, 1.0, 0.1]).unwrap();
        pf.set_weights(&[1e308, 1e308, 0.0]).unwrap();
        assert_approx_eq!(pf.effective_sample_size(), 2.0, 1e-12);
        let estimate = pf.estimate().unwrap();
        assert!(estimate.pose.x.is_finite());
        assert!(estimate.covariance.iter().all(|c| c.is_finite()));
        for _ in 0..20 {
            assert_eq!(pf.resample(), Ok(ResampleOutcome::Resampled));
            assert!(pf.particles().iter().all(|p| p.id != 2));
            assert!(pf.weights_in_sync());
        }

        let mut rng = StdRng::seed_from_u64(26);
        for strategy in [
            ResamplingStrategy::Multinomial,
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Stratified,
        ] {
            let indices = strategy
                .draw_indices(&[1e308, 1e308, 0.0], 300, &mut rng)
                .unwrap();
            assert!(indices.iter().all(|&i| i != 2), "{:?} drew a zero-weight index", strategy);
            let first = indices.iter().filter(|&&i| i == 0).count() as f64 / 300.0;
            assert_approx_eq!(first, 0.5, 0.15);
        }
    }

    #[test]
    fn overflowed_likelihood_still_resamples() {
        let config = FilterConfig {
            degenerate_policy: DegeneratePolicy::Fail,
            ..seeded_config(1, 27)
        };
        let mut pf = ParticleFilter::new(config).unwrap();
        pf.init(0.0, 0.0, 0.0, [0.0; 3]).unwrap();
        let map = Map::from_landmarks(vec![Landmark::new(1, 1.0, 0.0)]);
        let observations = vec![LandmarkObservation::new(1.0, 0.0); 80];
        pf.update_weights(50.0, [1e-3, 1e-3], &observations, &map).unwrap();
        assert_eq!(pf.weights()[0], f64::INFINITY);
        assert_eq!(pf.effective_sample_size(), 1.0);
        assert_eq!(pf.resample(), Ok(ResampleOutcome::Resampled));
        assert_eq!(pf.estimate().unwrap().pose, Pose2D::default());
    }

    #[test]
    fn zero_weight_estimate_falls_back_to_unweighted() {
        let mut pf = ParticleFilter::new(seeded_config(100, 23)).unwrap();
        pf.init(3.0, 3.0, 0.0, [1.0, 1.0, 0.1]).unwrap();
        pf.set_weights(&vec![0.0; 100]).unwrap();
        let estimate = pf.estimate().unwrap();
        assert!(estimate.pose.x.is_finite());
        assert_eq!(estimate.effective_sample_size, 0.0);
    }

    #[test]
    fn same_seed_is_reproducible() {
        let run = || {
            let mut pf = ParticleFilter::new(seeded_config(30, 24)).unwrap();
            pf.init(1.0, 1.0, 0.0, [0.5, 0.5, 0.05]).unwrap();
            pf.prediction(0.1, [0.3, 0.3, 0.01], &Control::new(3.0, 0.2)).unwrap();
            let map = Map::from_landmarks(vec![Landmark::new(1, 5.0, 2.0)]);
            pf.update_weights(50.0, [0.3, 0.3], &[LandmarkObservation::new(4.0, 1.0)], &map)
                .unwrap();
            pf.resample().unwrap();
            pf.particles().to_vec()
        };
        assert_eq!(run(), run());
    }
}
