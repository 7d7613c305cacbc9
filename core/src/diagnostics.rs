//! Association diagnostics for external reporting.
//!
//! Nothing here affects estimation. A particle's association lists are turned into whitespace-joined text,
//! the format expected by visualisation front ends: `"1 5 12"` for associations and matching lists for the
//! sensed map coordinates, with no trailing separator.

use crate::particle::Particle;

use std::fmt::{self, Display};

/// Immutable snapshot of one particle's association bookkeeping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssociationRecord {
    associations: Vec<u32>,
    sense_x: Vec<f64>,
    sense_y: Vec<f64>,
}
impl AssociationRecord {
    pub fn new(associations: Vec<u32>, sense_x: Vec<f64>, sense_y: Vec<f64>) -> Self {
        AssociationRecord {
            associations,
            sense_x,
            sense_y,
        }
    }
    pub fn from_particle(particle: &Particle) -> Self {
        AssociationRecord::new(
            particle.associations.clone(),
            particle.sense_x.clone(),
            particle.sense_y.clone(),
        )
    }
    pub fn len(&self) -> usize {
        self.associations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.associations.is_empty()
    }
    /// Landmark ids, e.g. `"1 5 12"`
    pub fn associations(&self) -> String {
        join(&self.associations)
    }
    /// Map-frame x coordinates of the associated observations
    pub fn sense_x(&self) -> String {
        join(&self.sense_x)
    }
    /// Map-frame y coordinates of the associated observations
    pub fn sense_y(&self) -> String {
        join(&self.sense_y)
    }
}
impl Display for AssociationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "associations: [{}] sense_x: [{}] sense_y: [{}]",
            self.associations(),
            self.sense_x(),
            self.sense_y()
        )
    }
}

/// Copy of `particle` carrying the given association lists.
pub fn with_associations(
    particle: &Particle,
    associations: Vec<u32>,
    sense_x: Vec<f64>,
    sense_y: Vec<f64>,
) -> Particle {
    Particle {
        associations,
        sense_x,
        sense_y,
        ..particle.clone()
    }
}

pub fn get_associations(particle: &Particle) -> String {
    join(&particle.associations)
}

pub fn get_sense_x(particle: &Particle) -> String {
    join(&particle.sense_x)
}

pub fn get_sense_y(particle: &Particle) -> String {
    join(&particle.sense_y)
}

fn join<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
