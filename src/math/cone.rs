//! Bounding cones for spherical caps
//!
//! A page draped on a sphere is bounded by the cone of directions from the
//! sphere's center through the page. Combined with a radius range `[r0, r1]`
//! this bounds the thick shell segment holding the page's geometry.

use std::f64::consts::PI;

use crate::core::types::DVec3;

/// Cone of directions from the origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cone {
    /// Unit axis
    pub axis: DVec3,
    /// Half-angle in radians, clamped to `[0, PI]`
    pub half_angle: f64,
}

impl Cone {
    pub fn new(axis: DVec3, half_angle: f64) -> Self {
        Self {
            axis: axis.normalize_or(DVec3::Z),
            half_angle: half_angle.clamp(0.0, PI),
        }
    }

    /// Smallest cone around the mean direction that contains every direction.
    pub fn from_directions(dirs: &[DVec3]) -> Self {
        let sum = dirs.iter().fold(DVec3::ZERO, |acc, d| acc + d.normalize_or_zero());
        let Some(axis) = sum.try_normalize() else {
            // Directions cancel out: the set wraps the whole sphere.
            return Self::new(DVec3::Z, PI);
        };
        let half_angle = dirs
            .iter()
            .map(|d| angle_between(axis, *d))
            .fold(0.0, f64::max);
        Self::new(axis, half_angle)
    }

    /// Whether a direction lies inside the cone.
    pub fn contains_direction(&self, dir: DVec3) -> bool {
        angle_between(self.axis, dir) <= self.half_angle
    }

    /// Maximum of `normal · x` over all points `x` inside the cone with
    /// `|x|` in `[r0, r1]`. `normal` must be unit length.
    pub fn max_dot(&self, normal: DVec3, r0: f64, r1: f64) -> f64 {
        let theta = angle_between(self.axis, normal);
        let cos_max = (theta - self.half_angle).max(0.0).cos();
        if cos_max >= 0.0 {
            r1 * cos_max
        } else {
            r0 * cos_max
        }
    }

    /// Area of the spherical cap cut by the cone at `radius`.
    pub fn cap_area(&self, radius: f64) -> f64 {
        2.0 * PI * radius * radius * (1.0 - self.half_angle.cos())
    }

    /// Distance from `eye` to the nearest point of the cap at `radius`.
    pub fn nearest_distance(&self, eye: DVec3, radius: f64) -> f64 {
        let dist = eye.length();
        if dist == 0.0 {
            return radius;
        }
        let delta = (angle_between(self.axis, eye) - self.half_angle).max(0.0);
        let d2 = dist * dist + radius * radius - 2.0 * dist * radius * delta.cos();
        d2.max(0.0).sqrt()
    }
}

/// Angle between two directions in radians.
pub fn angle_between(a: DVec3, b: DVec3) -> f64 {
    let (Some(a), Some(b)) = (a.try_normalize(), b.try_normalize()) else {
        return 0.0;
    };
    a.dot(b).clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_directions() {
        let cone = Cone::from_directions(&[
            DVec3::new(1.0, 0.0, 1.0),
            DVec3::new(-1.0, 0.0, 1.0),
        ]);
        assert!((cone.axis - DVec3::Z).length() < 1e-12);
        assert!((cone.half_angle - PI / 4.0).abs() < 1e-12);
        assert!(cone.contains_direction(DVec3::Z));
        assert!(!cone.contains_direction(DVec3::X));
    }

    #[test]
    fn test_opposite_directions_cover_sphere() {
        let cone = Cone::from_directions(&[DVec3::X, -DVec3::X]);
        assert_eq!(cone.half_angle, PI);
    }

    #[test]
    fn test_max_dot() {
        let cone = Cone::new(DVec3::Z, 0.1);
        // Facing the plane normal: outer radius wins
        assert!((cone.max_dot(DVec3::Z, 1.0, 2.0) - 2.0).abs() < 1e-12);
        // Facing away: inner radius gives the least negative value
        let back = cone.max_dot(-DVec3::Z, 1.0, 2.0);
        assert!((back - (-(PI - 0.1).cos().abs())).abs() < 1e-9);
    }

    #[test]
    fn test_cap_area() {
        let hemisphere = Cone::new(DVec3::Z, PI / 2.0);
        assert!((hemisphere.cap_area(1.0) - 2.0 * PI).abs() < 1e-9);
        let sphere = Cone::new(DVec3::Z, PI);
        assert!((sphere.cap_area(1.0) - 4.0 * PI).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_distance() {
        let cone = Cone::new(DVec3::Z, 0.2);
        // Eye straight above the cap
        assert!((cone.nearest_distance(DVec3::new(0.0, 0.0, 3.0), 1.0) - 2.0).abs() < 1e-12);
        // Eye off to the side is farther than the altitude
        assert!(cone.nearest_distance(DVec3::new(3.0, 0.0, 0.0), 1.0) > 2.0);
    }
}
