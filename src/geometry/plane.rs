//! Reference plane used as nominal depth baseline before elevation is known.

use nalgebra::{Unit, Vector3};
use serde::Deserialize;

/// Minimum |n · d| for a ray to be considered non-parallel to the plane.
const PARALLEL_EPS: f64 = 1e-9;

/// Plane defined by all points `p` with `normal · p = offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub normal: Unit<Vector3<f64>>,
    pub offset: f64,
}

impl Plane {
    pub fn new(normal: Vector3<f64>, offset: f64) -> Option<Self> {
        let norm = normal.norm();
        if !norm.is_finite() || norm < 1e-12 || !offset.is_finite() {
            return None;
        }
        Some(Self {
            normal: Unit::new_normalize(normal),
            offset: offset / norm,
        })
    }

    /// Horizontal plane at the given height (z-up world).
    pub fn horizontal(z: f64) -> Self {
        Self {
            normal: Vector3::z_axis(),
            offset: z,
        }
    }

    pub fn signed_distance(&self, p: &Vector3<f64>) -> f64 {
        self.normal.dot(p) - self.offset
    }

    /// Intersect the ray `origin + s * dir` (s > 0) with the plane.
    pub fn intersect_ray(&self, origin: &Vector3<f64>, dir: &Vector3<f64>) -> Option<Vector3<f64>> {
        let denom = self.normal.dot(dir);
        if denom.abs() < PARALLEL_EPS {
            return None;
        }
        let s = -self.signed_distance(origin) / denom;
        if s <= 0.0 {
            return None;
        }
        Some(origin + dir * s)
    }
}

impl Default for Plane {
    fn default() -> Self {
        Self::horizontal(0.0)
    }
}

/// Serialized form of a plane: `{ normal: [nx, ny, nz], offset: d }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaneSettings {
    pub normal: [f64; 3],
    pub offset: f64,
}

impl Default for PlaneSettings {
    fn default() -> Self {
        Self {
            normal: [0.0, 0.0, 1.0],
            offset: 0.0,
        }
    }
}

impl PlaneSettings {
    pub fn to_plane(&self) -> Option<Plane> {
        Plane::new(Vector3::from(self.normal), self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ray_hits_ground() {
        let plane = Plane::horizontal(0.0);
        let hit = plane
            .intersect_ray(&Vector3::new(1.0, 2.0, 50.0), &Vector3::new(0.0, 0.0, -1.0))
            .unwrap();
        assert_relative_eq!(hit, Vector3::new(1.0, 2.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_ray_pointing_away_misses() {
        let plane = Plane::horizontal(0.0);
        assert!(plane
            .intersect_ray(&Vector3::new(0.0, 0.0, 50.0), &Vector3::new(0.0, 0.0, 1.0))
            .is_none());
        assert!(plane
            .intersect_ray(&Vector3::new(0.0, 0.0, 50.0), &Vector3::new(1.0, 0.0, 0.0))
            .is_none());
    }

    #[test]
    fn test_new_normalizes() {
        let plane = Plane::new(Vector3::new(0.0, 0.0, 2.0), 4.0).unwrap();
        assert_relative_eq!(plane.offset, 2.0);
        assert_relative_eq!(plane.signed_distance(&Vector3::new(5.0, 5.0, 3.0)), 1.0);
        assert!(Plane::new(Vector3::zeros(), 1.0).is_none());
    }
}
