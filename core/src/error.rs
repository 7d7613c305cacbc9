//! Error type shared by the localization filter and its configuration.

use thiserror::Error;

/// Failures reported by [`crate::particle::ParticleFilter`] and configuration validation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    /// A cycle operation was requested before `init` seeded the particle set.
    #[error("particle filter has not been initialized")]
    NotInitialized,
    /// `init` was called on a filter that already holds a particle set.
    #[error("particle filter is already initialized")]
    AlreadyInitialized,
    /// A standard deviation was negative, non-finite, or zero where it is used as a divisor.
    #[error("invalid standard deviation for {name}: {value}")]
    InvalidStdDev { name: &'static str, value: f64 },
    /// A configuration value is outside its allowed range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Externally supplied weights do not fit the particle set.
    #[error("invalid weights: {0}")]
    InvalidWeights(String),
    /// Every particle weight is zero, so the resampling distribution is undefined.
    #[error("all {num_particles} particle weights are zero; resampling distribution is undefined")]
    DegenerateWeights { num_particles: usize },
}

/// Validate a process/prior standard deviation. Zero is allowed (no noise).
pub(crate) fn check_noise_std(name: &'static str, value: f64) -> Result<f64, FilterError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(FilterError::InvalidStdDev { name, value })
    }
}

/// Validate a measurement standard deviation, which appears in a denominator.
pub(crate) fn check_measurement_std(name: &'static str, value: f64) -> Result<f64, FilterError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(FilterError::InvalidStdDev { name, value })
    }
}
