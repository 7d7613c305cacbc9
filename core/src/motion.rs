//! Constant turn-rate and velocity (CTRV) kinematics used by the prediction step.
//!
//! A particle is moved along a circular arc when the commanded yaw rate is significant and along a
//! straight line otherwise. The threshold keeps the `v / ω` term from blowing up as the yaw rate
//! approaches zero. Process noise is not applied here; see
//! [`ParticleFilter::prediction`](crate::particle::ParticleFilter::prediction).

use crate::{Control, Pose2D};

/// Yaw rates at or below this magnitude (rad/s) use the straight-line model.
pub const DEFAULT_YAW_RATE_THRESHOLD: f64 = 1e-3;

/// Deterministic kinematic step of a pose.
///
/// # Arguments
/// * `pose` - Starting pose in the map frame
/// * `control` - Commanded linear velocity and yaw rate
/// * `dt` - Elapsed time in seconds
/// * `yaw_rate_threshold` - Magnitude above which the arc model is used
///
/// The heading is not wrapped.
///
/// # Example
/// ```rust
/// use mcl::{Control, Pose2D};
/// use mcl::motion::{predict_pose, DEFAULT_YAW_RATE_THRESHOLD};
///
/// let next = predict_pose(&Pose2D::default(), &Control::new(2.0, 0.0), 1.0, DEFAULT_YAW_RATE_THRESHOLD);
/// assert_eq!(next, Pose2D::new(2.0, 0.0, 0.0));
/// ```
pub fn predict_pose(pose: &Pose2D, control: &Control, dt: f64, yaw_rate_threshold: f64) -> Pose2D {
    let Control { velocity, yaw_rate } = *control;
    if yaw_rate.abs() > yaw_rate_threshold {
        let yaw_change = yaw_rate * dt;
        let radius = velocity / yaw_rate;
        Pose2D {
            x: pose.x + radius * ((pose.theta + yaw_change).sin() - pose.theta.sin()),
            y: pose.y + radius * (pose.theta.cos() - (pose.theta + yaw_change).cos()),
            theta: pose.theta + yaw_change,
        }
    } else {
        let distance = velocity * dt;
        Pose2D {
            x: pose.x + distance * pose.theta.cos(),
            y: pose.y + distance * pose.theta.sin(),
            theta: pose.theta,
        }
    }
}
