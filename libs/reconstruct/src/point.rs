//! LiDAR points and their observer-relative spherical position.

use glam::DVec3;

/// A captured LiDAR return.
///
/// `range`, `azimuth` and `polar` are derived by [`SpatialPoint::face_to`] and
/// are only meaningful relative to the last observer passed to it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpatialPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// GPS time of the return.
    pub time: i64,
    pub intensity: i32,
    pub range: f64,
    /// Degrees in `[0, 360)`, clockwise from the observer heading.
    pub azimuth: f64,
    /// Degrees in `[0, 180)`, zero straight up.
    pub polar: f64,
}

impl SpatialPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            ..Self::default()
        }
    }

    pub fn with_capture(x: f64, y: f64, z: f64, time: i64, intensity: i32) -> Self {
        Self {
            time,
            intensity,
            ..Self::new(x, y, z)
        }
    }

    pub fn position(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }

    /// Recompute the spherical position relative to `observer` looking along
    /// `heading` degrees.
    pub fn face_to(&mut self, observer: DVec3, heading: f64) {
        let d = self.position() - observer;
        let planar = (d.x * d.x + d.y * d.y).sqrt();

        self.range = d.length();
        let azimuth = ((360.0 - d.y.atan2(d.x).to_degrees()) + (360.0 - (heading + 90.0)))
            .rem_euclid(360.0);
        // rem_euclid rounds tiny negatives up to exactly 360
        self.azimuth = if azimuth >= 360.0 { 0.0 } else { azimuth };

        let mut polar = planar.atan2(d.z).to_degrees();
        if polar < 0.0 {
            polar += 180.0;
        }
        self.polar = polar % 180.0;
    }

    /// Image column for an equirectangular image `width` pixels wide.
    pub fn column(&self, width: usize) -> usize {
        to_pixel(width as f64 * self.azimuth / 360.0, width)
    }

    /// Image row for an equirectangular image `height` pixels tall.
    pub fn row(&self, height: usize) -> usize {
        to_pixel(height as f64 * self.polar / 180.0, height)
    }
}

fn to_pixel(value: f64, extent: usize) -> usize {
    // Truncation toward zero; the clamp only catches float rounding at the
    // upper edge of the angle range.
    (value.max(0.0) as usize).min(extent.saturating_sub(1))
}
