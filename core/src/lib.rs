//! Landmark-based Monte Carlo localization toolbox
//!
//! This crate estimates the planar pose (x, y, heading) of a mobile agent on a known, static map of
//! point landmarks. The belief over the pose is represented by a weighted set of particles that is
//! cycled through the classic sampling-importance-resampling loop:
//!
//! 1. [particle::ParticleFilter::init] seeds the particles around a prior pose (typically a coarse GPS fix).
//! 2. [particle::ParticleFilter::prediction] moves every particle with a noisy constant-turn-rate kinematic step
//!    (see [motion]).
//! 3. [particle::ParticleFilter::update_weights] transforms the vehicle-frame landmark detections into the map
//!    frame of each particle, associates every detection with its nearest landmark and weights the particle
//!    with a product of bivariate Gaussian likelihoods (see [measurements]).
//! 4. [particle::ParticleFilter::resample] draws a new particle set with probability proportional to weight.
//!
//! The map is never modified (no SLAM) and data association is strictly nearest-neighbour.
//!
//! Primarily built off of:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): planar rotations and vectors for the frame transforms.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): the
//!   seeded generator owned by the filter, Gaussian noise and categorical sampling.
//!
//! All other functionality is auxiliary: configuration files ([config]), CSV input/output and scenario
//! replay ([sim]) and formatted association diagnostics ([diagnostics]).
//!
//! ## Coordinate conventions
//!
//! Poses live in the map frame. Headings are in radians, measured counter-clockwise from the map x-axis and
//! are never wrapped by the filter: repeated turning accumulates an unbounded heading. Use [wrap_to_pi] when a
//! bounded angle is needed for reporting. Observations are expressed in the vehicle frame, with x forward and
//! y to the left of the agent.
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod map;
pub mod measurements;
pub mod motion;
pub mod particle;
pub mod sim;

use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

pub use crate::error::FilterError;

/// Planar pose of the agent (or of a particle hypothesis) in the map frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    /// Position along the map x-axis
    pub x: f64,
    /// Position along the map y-axis
    pub y: f64,
    /// Heading in radians, unbounded
    pub theta: f64,
}
impl Display for Pose2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose2D(x: {:.4}, y: {:.4}, theta: {:.4} rad)",
            self.x, self.y, self.theta
        )
    }
}
impl Pose2D {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose2D { x, y, theta }
    }
    /// Position as a vector
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
    /// Rigid transform of a vehicle-frame point into the map frame.
    ///
    /// The point is rotated by the pose heading first and then translated by the pose position. There is no
    /// scaling.
    ///
    /// # Example
    /// ```rust
    /// use mcl::Pose2D;
    /// use nalgebra::Vector2;
    ///
    /// let pose = Pose2D::new(5.0, 5.0, std::f64::consts::FRAC_PI_2);
    /// let map_point = pose.to_map_frame(&Vector2::new(1.0, 0.0));
    /// assert!((map_point[0] - 5.0).abs() < 1e-12);
    /// assert!((map_point[1] - 6.0).abs() < 1e-12);
    /// ```
    pub fn to_map_frame(&self, local: &Vector2<f64>) -> Vector2<f64> {
        Rotation2::new(self.theta) * local + self.position()
    }
}
impl From<(f64, f64, f64)> for Pose2D {
    fn from(tuple: (f64, f64, f64)) -> Self {
        Pose2D::new(tuple.0, tuple.1, tuple.2)
    }
}

/// Commanded motion for one prediction step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Control {
    /// Linear velocity along the heading (m/s)
    pub velocity: f64,
    /// Yaw rate (rad/s), positive counter-clockwise
    pub yaw_rate: f64,
}
impl Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Control(velocity: {:.4} m/s, yaw_rate: {:.4} rad/s)",
            self.velocity, self.yaw_rate
        )
    }
}
impl Control {
    pub fn new(velocity: f64, yaw_rate: f64) -> Self {
        Control { velocity, yaw_rate }
    }
}

/// Wrap an angle in radians to the range (-pi, pi]
pub fn wrap_to_pi(angle: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let mut wrapped = angle % two_pi;
    if wrapped > std::f64::consts::PI {
        wrapped -= two_pi;
    } else if wrapped <= -std::f64::consts::PI {
        wrapped += two_pi;
    }
    wrapped
}
/// Wrap an angle in radians to the range [0, 2pi)
pub fn wrap_to_2pi(angle: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let wrapped = angle % two_pi;
    if wrapped < 0.0 {
        wrapped + two_pi
    } else {
        wrapped
    }
}
