//! Near-ground surface synthesis.
//!
//! The scanner never sees the road right under the vehicle. Rows looking far
//! enough down are filled with the distance to a flat ground plane at camera
//! height, rotated by the vehicle attitude.

use std::sync::atomic::{AtomicBool, Ordering};

use glam::{DMat3, DVec3};

use crate::{DepthRaster, Pose, ReconstructError, SpatialPoint, Stage};

/// Camera height above ground used when no calibration is available.
pub const DEFAULT_CAMERA_HEIGHT: f64 = 2.35;

/// Polar angle (degrees) below which no ground is asserted.
const GROUND_ASSERTION_MIN_ANGLE: f64 = 115.0;

/// Extra polar angle required towards the front and back of the vehicle.
const VISION_CURVE: f64 = 16.0;

/// Per-capture camera calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub camera_height: f64,
    pub heading_offset: f64,
    pub pitch_offset: f64,
    pub roll_offset: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            camera_height: DEFAULT_CAMERA_HEIGHT,
            heading_offset: 0.0,
            pitch_offset: 0.0,
            roll_offset: 0.0,
        }
    }
}

/// Yaw-pitch-roll rotation (degrees): roll about y, pitch about x, yaw
/// about z, applied as `Ry * (Rx * Rz)`.
pub fn rotation_matrix(yaw: f64, pitch: f64, roll: f64) -> DMat3 {
    DMat3::from_rotation_y(roll.to_radians())
        * (DMat3::from_rotation_x(pitch.to_radians()) * DMat3::from_rotation_z(yaw.to_radians()))
}

pub(crate) fn synthesize_ground(
    raster: &mut DepthRaster,
    pose: &Pose,
    calibration: &Calibration,
    cancel: &AtomicBool,
) -> Result<(), ReconstructError> {
    let (width, height) = (raster.width(), raster.height());
    let phi_per_pixel = 180.0 / height as f64;
    let theta_per_pixel = 360.0 / width as f64;

    // Yaw 180 faces the synthetic rays to the front of the vehicle.
    let rotation = rotation_matrix(
        180.0 + calibration.heading_offset,
        pose.pitch + calibration.pitch_offset,
        pose.roll + calibration.roll_offset,
    );

    for y in (height / 2 + 1..height).rev() {
        if cancel.load(Ordering::Relaxed) {
            return Err(ReconstructError::Cancelled(Stage::SynthesizeGroundSurface));
        }

        let polar_deg = y as f64 * phi_per_pixel;
        let distance = calibration.camera_height / (180.0 - polar_deg).to_radians().cos();
        let phi = polar_deg.to_radians();

        for x in 0..width {
            let theta = (x as f64 * theta_per_pixel).to_radians();
            if polar_deg <= GROUND_ASSERTION_MIN_ANGLE + theta.cos().abs() * VISION_CURVE {
                continue;
            }

            let ray = DVec3::new(
                distance * phi.sin() * theta.cos(),
                distance * phi.sin() * theta.sin(),
                distance * phi.cos(),
            );
            let world = rotation * ray + pose.position;

            let mut p = SpatialPoint::new(world.x, world.y, world.z);
            p.face_to(pose.position, 0.0);
            raster.set(p.row(height), p.column(width), distance as f32);
        }
    }
    Ok(())
}
