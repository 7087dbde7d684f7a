//! Detail metrics for page refinement
//!
//! A page holds `tile_size²` texels. Seen from the eye it covers some solid
//! angle, which the frustum converts to screen pixels. When the page has
//! fewer texels than the pixels it covers (ratio below the cutoff) it is too
//! coarse on its own and its children are requested.

use std::f64::consts::PI;

/// Smallest distance used for solid angle estimates
const MIN_DISTANCE: f64 = 1e-9;

/// Number of levels below the root needed to reach full resolution
///
/// # Examples
/// ```
/// use thumb::streaming::detail::max_level;
///
/// assert_eq!(max_level(256, 256, 256), 0);     // Single page
/// assert_eq!(max_level(512, 256, 256), 1);     // Two pages wide
/// assert_eq!(max_level(1000, 500, 256), 2);    // Partial pages round up
/// assert_eq!(max_level(86400, 43200, 512), 8); // Blue Marble class
/// ```
pub fn max_level(width: u32, height: u32, tile_size: u32) -> u32 {
    let extent = width.max(height).max(1) as u64;
    let tile = tile_size.max(1) as u64;
    let mut level = 0;
    while tile << level < extent {
        level += 1;
    }
    level
}

/// Edge length in source pixels of a page at `level`
///
/// # Examples
/// ```
/// use thumb::streaming::detail::page_span;
///
/// assert_eq!(page_span(0, 2, 256), 1024); // Root covers everything
/// assert_eq!(page_span(2, 2, 256), 256);  // Finest level is 1:1
/// ```
pub fn page_span(level: u32, max_level: u32, tile_size: u32) -> u64 {
    (tile_size as u64) << max_level.saturating_sub(level)
}

/// Solid angle (steradians) of a surface patch of `area` at `distance`,
/// clamped to the full sphere
///
/// # Examples
/// ```
/// use thumb::streaming::detail::projected_solid_angle;
///
/// assert_eq!(projected_solid_angle(1.0, 1.0), 1.0);
/// assert_eq!(projected_solid_angle(1.0, 2.0), 0.25);
/// // Standing on the patch sees at most the full sphere
/// assert_eq!(projected_solid_angle(1.0, 0.0), 4.0 * std::f64::consts::PI);
/// ```
pub fn projected_solid_angle(area: f64, distance: f64) -> f64 {
    let d = distance.max(MIN_DISTANCE);
    (area / (d * d)).min(4.0 * PI)
}

/// Texels of a page per screen pixel it covers
///
/// # Examples
/// ```
/// use thumb::streaming::detail::texel_ratio;
///
/// // 256x256 texels over 65536 pixels is exactly 1:1
/// assert_eq!(texel_ratio(256, 1.0, 65536.0), 1.0);
/// // Covering four times the pixels halves the density twice
/// assert_eq!(texel_ratio(256, 4.0, 65536.0), 0.25);
/// // Invisible pages are infinitely dense
/// assert!(texel_ratio(256, 0.0, 65536.0).is_infinite());
/// ```
pub fn texel_ratio(tile_size: u32, solid_angle: f64, pixels_per_steradian: f64) -> f64 {
    let pixels = solid_angle * pixels_per_steradian;
    if pixels <= 0.0 {
        return f64::INFINITY;
    }
    let texels = tile_size as f64 * tile_size as f64;
    texels / pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_level_small_images() {
        assert_eq!(max_level(1, 1, 256), 0);
        assert_eq!(max_level(0, 0, 256), 0);
        assert_eq!(max_level(257, 1, 256), 1);
    }

    #[test]
    fn test_page_span_saturates() {
        assert_eq!(page_span(5, 2, 64), 64);
    }

    #[test]
    fn test_ratio_shrinks_with_proximity() {
        let far = texel_ratio(256, projected_solid_angle(1.0, 10.0), 1e6);
        let near = texel_ratio(256, projected_solid_angle(1.0, 1.0), 1e6);
        assert!(near < far);
        assert!((far / near - 100.0).abs() < 1e-9);
    }
}
