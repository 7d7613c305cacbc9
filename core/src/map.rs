//! Static landmark map and nearest-neighbour association.
//!
//! The map is an ordered, immutable list of point landmarks. It is loaded once (or built in memory) and then
//! shared read-only by every particle during a weight update. Association is by squared Euclidean distance
//! with ties resolved in favour of the landmark that appears first in the map.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};
use std::io;
use std::path::Path;

/// A fixed map feature used as a measurement reference.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Unique landmark identifier
    pub id: u32,
    /// Map-frame x coordinate
    pub x: f64,
    /// Map-frame y coordinate
    pub y: f64,
}
impl Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Landmark(id: {}, x: {}, y: {})", self.id, self.x, self.y)
    }
}
impl Landmark {
    pub fn new(id: u32, x: f64, y: f64) -> Self {
        Landmark { id, x, y }
    }
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}

/// Ordered collection of landmarks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Map {
    landmarks: Vec<Landmark>,
}
impl Map {
    pub fn from_landmarks(landmarks: Vec<Landmark>) -> Self {
        Map { landmarks }
    }
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Landmark> {
        self.landmarks.iter()
    }
    /// Find the landmark closest to a map-frame point.
    ///
    /// Returns the landmark together with the *squared* distance to it, or `None` for an empty map. When
    /// several landmarks are equally close the first one in map order is returned.
    pub fn nearest(&self, point: &Vector2<f64>) -> Option<(&Landmark, f64)> {
        let mut nearest: Option<(&Landmark, f64)> = None;
        for landmark in &self.landmarks {
            let distance_sq = (landmark.position() - point).norm_squared();
            match nearest {
                Some((_, best)) if distance_sq >= best => {}
                _ => nearest = Some((landmark, distance_sq)),
            }
        }
        nearest
    }
    /// Reads a map from a CSV file with `id,x,y` columns.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mcl::map::Map;
    ///
    /// let map = Map::from_csv("./data/map.csv").expect("Failed to read map");
    /// println!("Loaded {} landmarks", map.len());
    /// ```
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut landmarks = Vec::new();
        for result in rdr.deserialize() {
            let landmark: Landmark = result?;
            landmarks.push(landmark);
        }
        Ok(Map { landmarks })
    }
    /// Writes the map to a CSV file with `id,x,y` columns.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for landmark in &self.landmarks {
            writer.serialize(landmark)?;
        }
        writer.flush()?;
        Ok(())
    }
}
impl From<Vec<Landmark>> for Map {
    fn from(landmarks: Vec<Landmark>) -> Self {
        Map::from_landmarks(landmarks)
    }
}
impl<'a> IntoIterator for &'a Map {
    type Item = &'a Landmark;
    type IntoIter = std::slice::Iter<'a, Landmark>;
    fn into_iter(self) -> Self::IntoIter {
        self.landmarks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn square_map() -> Map {
        Map::from_landmarks(vec![
            Landmark::new(1, 0.0, 0.0),
            Landmark::new(2, 10.0, 0.0),
            Landmark::new(3, 10.0, 10.0),
            Landmark::new(4, 0.0, 10.0),
        ])
    }

    #[test]
    fn nearest_picks_closest_landmark() {
        let map = square_map();
        let (landmark, distance_sq) = map.nearest(&Vector2::new(9.0, 8.0)).unwrap();
        assert_eq!(landmark.id, 3);
        assert_approx_eq!(distance_sq, 5.0, 1e-12);
    }

    #[test]
    fn nearest_ties_go_to_first_in_map_order() {
        let map = square_map();
        let (landmark, _) = map.nearest(&Vector2::new(5.0, 0.0)).unwrap();
        assert_eq!(landmark.id, 1);
        let (landmark, _) = map.nearest(&Vector2::new(5.0, 5.0)).unwrap();
        assert_eq!(landmark.id, 1);
    }

    #[test]
    fn nearest_on_empty_map_is_none() {
        let map = Map::default();
        assert!(map.is_empty());
        assert!(map.nearest(&Vector2::new(0.0, 0.0)).is_none());
    }

    #[test]
    fn csv_round_trip() {
        let map = square_map();
        let path = std::env::temp_dir().join("mcl_map_round_trip.csv");
        map.to_csv(&path).unwrap();
        let loaded = Map::from_csv(&path).unwrap();
        assert_eq!(loaded, map);
        let _ = std::fs::remove_file(&path);
    }
}
