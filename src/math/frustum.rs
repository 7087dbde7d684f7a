//! View frustum for page visibility and detail tests

use crate::core::types::{DMat4, DVec3, DVec4};
use super::cone::Cone;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub normal: DVec3,
    pub distance: f64,
}

impl Plane {
    pub fn new(normal: DVec3, distance: f64) -> Self {
        Self { normal, distance }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }
}

/// View frustum with 6 planes (Near, Far, Left, Right, Top, Bottom), the eye
/// it was built from, and the screen density used for detail decisions.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane; 6],
    /// Eye position in the same space as the planes
    pub eye: DVec3,
    /// Screen pixels covered by one steradian at the view center
    pub pixels_per_steradian: f64,
}

impl Frustum {
    /// Extract frustum planes from view-projection matrix
    pub fn from_view_projection(vp: &DMat4, eye: DVec3, pixels_per_steradian: f64) -> Self {
        let m = vp.to_cols_array_2d();

        // Left: row3 + row0
        let left = Self::normalize_plane(DVec4::new(
            m[0][3] + m[0][0],
            m[1][3] + m[1][0],
            m[2][3] + m[2][0],
            m[3][3] + m[3][0],
        ));

        // Right: row3 - row0
        let right = Self::normalize_plane(DVec4::new(
            m[0][3] - m[0][0],
            m[1][3] - m[1][0],
            m[2][3] - m[2][0],
            m[3][3] - m[3][0],
        ));

        // Bottom: row3 + row1
        let bottom = Self::normalize_plane(DVec4::new(
            m[0][3] + m[0][1],
            m[1][3] + m[1][1],
            m[2][3] + m[2][1],
            m[3][3] + m[3][1],
        ));

        // Top: row3 - row1
        let top = Self::normalize_plane(DVec4::new(
            m[0][3] - m[0][1],
            m[1][3] - m[1][1],
            m[2][3] - m[2][1],
            m[3][3] - m[3][1],
        ));

        // Near: row2 alone for a [0, 1] depth range
        let near = Self::normalize_plane(DVec4::new(m[0][2], m[1][2], m[2][2], m[3][2]));

        // Far: row3 - row2
        let far = Self::normalize_plane(DVec4::new(
            m[0][3] - m[0][2],
            m[1][3] - m[1][2],
            m[2][3] - m[2][2],
            m[3][3] - m[3][2],
        ));

        Self {
            planes: [near, far, left, right, top, bottom],
            eye,
            pixels_per_steradian,
        }
    }

    /// Build a perspective frustum looking from `eye` toward `target`.
    ///
    /// `viewport_height` is in pixels; `fov_y` in radians.
    pub fn perspective(
        eye: DVec3,
        target: DVec3,
        up: DVec3,
        fov_y: f64,
        aspect: f64,
        near: f64,
        far: f64,
        viewport_height: f64,
    ) -> Self {
        let proj = DMat4::perspective_rh(fov_y, aspect, near, far);
        let view = DMat4::look_at_rh(eye, target, up);
        let pixels_per_radian = viewport_height / fov_y;
        Self::from_view_projection(&(proj * view), eye, pixels_per_radian * pixels_per_radian)
    }

    fn normalize_plane(plane: DVec4) -> Plane {
        let normal = DVec3::new(plane.x, plane.y, plane.z);
        let len = normal.length();
        Plane {
            normal: normal / len,
            distance: plane.w / len,
        }
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Check if the shell segment bounded by `cone` and radii `[r0, r1]`
    /// intersects the frustum (conservative test)
    pub fn intersects_cone(&self, cone: &Cone, r0: f64, r1: f64) -> bool {
        for plane in &self.planes {
            // If the farthest point along the normal is behind the plane,
            // the whole segment is outside
            if cone.max_dot(plane.normal, r0, r1) + plane.distance < 0.0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looking_at_origin() -> Frustum {
        Frustum::perspective(
            DVec3::new(0.0, 0.0, 5.0),
            DVec3::ZERO,
            DVec3::Y,
            std::f64::consts::FRAC_PI_3,
            1.0,
            0.1,
            100.0,
            1080.0,
        )
    }

    #[test]
    fn test_plane_distance() {
        let plane = Plane::new(DVec3::Y, 0.0);
        assert_eq!(plane.distance_to_point(DVec3::new(0.0, 5.0, 0.0)), 5.0);
        assert_eq!(plane.distance_to_point(DVec3::new(0.0, -3.0, 0.0)), -3.0);
    }

    #[test]
    fn test_frustum_contains_point() {
        let proj = DMat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, 0.1, 100.0);
        let view = DMat4::look_at_rh(DVec3::new(0.0, 0.0, 5.0), DVec3::ZERO, DVec3::Y);
        let frustum = Frustum::from_view_projection(&(proj * view), DVec3::new(0.0, 0.0, 5.0), 1.0);

        assert!(frustum.contains_point(DVec3::ZERO));
        assert!(!frustum.contains_point(DVec3::new(0.0, 0.0, 10.0)));
    }

    #[test]
    fn test_cone_facing_eye_is_visible() {
        let frustum = looking_at_origin();
        let cone = Cone::new(DVec3::Z, 0.2);
        assert!(frustum.intersects_cone(&cone, 1.0, 1.1));
    }

    #[test]
    fn test_cone_behind_eye_is_culled() {
        let frustum = Frustum::perspective(
            DVec3::new(0.0, 0.0, 5.0),
            DVec3::new(0.0, 0.0, 10.0),
            DVec3::Y,
            std::f64::consts::FRAC_PI_3,
            1.0,
            0.1,
            100.0,
            1080.0,
        );
        let cone = Cone::new(DVec3::Z, 0.2);
        assert!(!frustum.intersects_cone(&cone, 1.0, 1.1));
    }

    #[test]
    fn test_cone_off_to_the_side_is_culled() {
        let frustum = looking_at_origin();
        // A small cap far out along +X, well outside a 60 degree view at distance 5
        let cone = Cone::new(DVec3::X, 0.05);
        assert!(!frustum.intersects_cone(&cone, 20.0, 21.0));
    }

    #[test]
    fn test_pixels_per_steradian() {
        let frustum = looking_at_origin();
        let expected = (1080.0 / std::f64::consts::FRAC_PI_3).powi(2);
        assert!((frustum.pixels_per_steradian - expected).abs() < 1e-6);
    }
}
