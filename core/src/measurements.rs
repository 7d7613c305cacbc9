//! Landmark observation model.
//!
//! Observations arrive in the vehicle frame without an identity. For a candidate pose each detection is
//! moved into the map frame, paired with its nearest landmark and scored with an axis-aligned bivariate
//! Gaussian. The weight of the pose is the product of the per-observation scores. The same raw detection
//! lands on a different map point under every hypothesis, so the association is redone per particle.

use crate::error::{FilterError, check_measurement_std};
use crate::map::Map;
use crate::Pose2D;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use std::f64::consts::PI;
use std::fmt::{self, Display};

/// A single sensor detection relative to the agent (x forward, y left).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkObservation {
    pub x: f64,
    pub y: f64,
}
impl Display for LandmarkObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LandmarkObservation(x: {}, y: {})", self.x, self.y)
    }
}
impl LandmarkObservation {
    pub fn new(x: f64, y: f64) -> Self {
        LandmarkObservation { x, y }
    }
    pub fn as_vector(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}

/// Pairing of one observation with a map landmark under a particular pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Association {
    /// Identifier of the nearest landmark
    pub landmark_id: u32,
    /// Observation transformed into the map frame
    pub map_point: Vector2<f64>,
    /// Squared distance from the transformed observation to the landmark
    pub distance_sq: f64,
    /// Signed offset `map_point - landmark`
    pub offset: Vector2<f64>,
}

/// Transform an observation with `pose` and find its nearest landmark. `None` for an empty map.
pub fn associate(pose: &Pose2D, observation: &LandmarkObservation, map: &Map) -> Option<Association> {
    let map_point = pose.to_map_frame(&observation.as_vector());
    map.nearest(&map_point).map(|(landmark, distance_sq)| Association {
        landmark_id: landmark.id,
        map_point,
        distance_sq,
        offset: map_point - landmark.position(),
    })
}

/// Bivariate Gaussian density with independent axes evaluated at the offset `(dx, dy)`.
pub fn gaussian_likelihood(dx: f64, dy: f64, std_x: f64, std_y: f64) -> f64 {
    let normalizer = 1.0 / (2.0 * PI * std_x * std_y);
    let exponent = dx.powi(2) / (2.0 * std_x.powi(2)) + dy.powi(2) / (2.0 * std_y.powi(2));
    normalizer * (-exponent).exp()
}

/// Result of scoring one pose against a batch of observations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseLikelihood {
    /// Product of per-observation likelihoods, or exactly zero after a range rejection
    pub weight: f64,
    /// Associations of the processed observations (empty unless recording was requested)
    pub associations: Vec<Association>,
    /// Whether an observation fell outside the sensor range
    pub rejected: bool,
}

/// Range-gated nearest-neighbour Gaussian observation model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObservationModel {
    /// Maximum reliable sensor range; a nearest landmark farther than this rejects the pose
    pub sensor_range: f64,
    /// Landmark measurement standard deviation along the map x-axis
    pub std_x: f64,
    /// Landmark measurement standard deviation along the map y-axis
    pub std_y: f64,
}
impl ObservationModel {
    /// Build a model, rejecting non-positive standard deviations and a negative range.
    pub fn new(sensor_range: f64, std_landmark: [f64; 2]) -> Result<Self, FilterError> {
        if sensor_range.is_nan() || sensor_range < 0.0 {
            return Err(FilterError::InvalidConfig(format!(
                "sensor range must be non-negative, got {}",
                sensor_range
            )));
        }
        Ok(ObservationModel {
            sensor_range,
            std_x: check_measurement_std("landmark x", std_landmark[0])?,
            std_y: check_measurement_std("landmark y", std_landmark[1])?,
        })
    }
    /// Peak value of the likelihood, reached at zero offset
    pub fn max_likelihood(&self) -> f64 {
        gaussian_likelihood(0.0, 0.0, self.std_x, self.std_y)
    }
    /// Score a pose against all observations.
    ///
    /// Observations are processed in order. The first one whose nearest landmark lies strictly beyond the
    /// sensor range forces the weight to zero and ends the pass.
    pub fn weigh(
        &self,
        pose: &Pose2D,
        observations: &[LandmarkObservation],
        map: &Map,
        record: bool,
    ) -> PoseLikelihood {
        let mut result = PoseLikelihood {
            weight: 1.0,
            associations: if record {
                Vec::with_capacity(observations.len())
            } else {
                Vec::new()
            },
            rejected: false,
        };
        for observation in observations {
            let association = match associate(pose, observation, map) {
                Some(association) if association.distance_sq.sqrt() <= self.sensor_range => {
                    association
                }
                _ => {
                    result.weight = 0.0;
                    result.rejected = true;
                    break;
                }
            };
            let likelihood = gaussian_likelihood(
                association.offset[0],
                association.offset[1],
                self.std_x,
                self.std_y,
            );
            // An overflowed product times an underflowed factor must stay zero, not NaN.
            result.weight = if likelihood == 0.0 {
                0.0
            } else {
                result.weight * likelihood
            };
            if record {
                result.associations.push(association);
            }
        }
        result
    }
}
