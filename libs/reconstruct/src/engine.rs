//! The reconstruction pipeline.
//!
//! Points are bucketed by range and rasterised farthest bucket first, each
//! bucket closed with a kernel that shrinks with distance. The ground blind
//! spot is then synthesised, holes are filled and the image is denoised
//! before encoding.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use glam::DVec3;
use image::RgbImage;
use tracing::debug;

use crate::filter::fill_holes;
use crate::ground::synthesize_ground;
use crate::{encode_raster, Calibration, DepthRaster, ReconstructError, SpatialPoint};

/// Full-resolution output width.
pub const IMAGE_WIDTH: usize = 4096;
/// Full-resolution output height.
pub const IMAGE_HEIGHT: usize = 2048;

/// Farthest reconstructed range.
pub const MAX_DISTANCE: f64 = 40.0;
/// Width of one range bucket.
pub const DISTANCE_SLICE: f64 = 0.25;
/// Points nearer than this are splattered to densify them.
pub const NEAR_DISTANCE_THRESHOLD: f64 = 7.5;

const SLICE_COUNT: usize = (MAX_DISTANCE / DISTANCE_SLICE) as usize;
const DISTANCED_SIZE_FACTOR: f64 = 2.0;
const MAX_CLOSE_HALF_SIZE: f64 = 6.0;

const BILATERAL_DIAMETER: usize = 50;
const BILATERAL_SIGMA_COLOR: f32 = 1.0;
const BILATERAL_SIGMA_SPACE: f32 = 25.0;

/// Pipeline stage, reported when a run is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RetrievePoints,
    ProjectAndFillNear,
    SynthesizeGroundSurface,
    Denoise,
    Encode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RetrievePoints => "retrieve points",
            Self::ProjectAndFillNear => "project and fill near",
            Self::SynthesizeGroundSurface => "synthesize ground surface",
            Self::Denoise => "denoise",
            Self::Encode => "encode",
        };
        f.write_str(s)
    }
}

/// Observer position and vehicle attitude (degrees) of a capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: DVec3,
    pub heading: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// Points grouped by range bucket, nearest bucket first.
#[derive(Debug, Clone)]
pub struct DistanceSlices {
    buckets: Vec<Vec<SpatialPoint>>,
}

impl DistanceSlices {
    /// Face every point to the observer and bucket it by range. Points at or
    /// beyond [`MAX_DISTANCE`] are dropped.
    pub fn build(
        points: impl IntoIterator<Item = SpatialPoint>,
        pose: &Pose,
        cancel: &AtomicBool,
    ) -> Result<Self, ReconstructError> {
        let mut buckets = vec![Vec::new(); SLICE_COUNT];
        for mut p in points {
            if cancel.load(Ordering::Relaxed) {
                return Err(ReconstructError::Cancelled(Stage::RetrievePoints));
            }
            p.face_to(pose.position, pose.heading);
            let slice = (p.range / DISTANCE_SLICE) as usize;
            if let Some(bucket) = buckets.get_mut(slice) {
                bucket.push(p);
            }
        }
        Ok(Self { buckets })
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    pub fn bucket(&self, slice: usize) -> &[SpatialPoint] {
        self.buckets.get(slice).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Closing kernel side for a bucket: 13 for the nearest, 1 for the farthest.
pub fn close_kernel_size(slice: usize) -> usize {
    let half = MAX_CLOSE_HALF_SIZE - slice as f64 * DISTANCE_SLICE / MAX_DISTANCE * MAX_CLOSE_HALF_SIZE;
    (half.max(0.0) as usize) * 2 + 1
}

/// Turns observer-relative point sets into encoded depth images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructionEngine {
    width: usize,
    height: usize,
}

impl Default for ReconstructionEngine {
    fn default() -> Self {
        Self::new(IMAGE_WIDTH, IMAGE_HEIGHT)
    }
}

impl ReconstructionEngine {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Run every stage after point retrieval.
    pub fn reconstruct(
        &self,
        slices: &DistanceSlices,
        pose: &Pose,
        calibration: &Calibration,
        cancel: &AtomicBool,
    ) -> Result<RgbImage, ReconstructError> {
        let started = Instant::now();
        let mut depth = self.project(slices, cancel)?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "projected points");

        synthesize_ground(&mut depth, pose, calibration, cancel)?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "synthesized ground");

        let depth = self.denoise(depth, cancel)?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "denoised");

        if cancel.load(Ordering::Relaxed) {
            return Err(ReconstructError::Cancelled(Stage::Encode));
        }
        Ok(encode_raster(&depth))
    }

    /// Rasterise the buckets farthest first, closing each one before merging
    /// it into the accumulated image.
    pub fn project(
        &self,
        slices: &DistanceSlices,
        cancel: &AtomicBool,
    ) -> Result<DepthRaster, ReconstructError> {
        let mut acc = DepthRaster::new(self.width, self.height);
        let mut temp = DepthRaster::new(self.width, self.height);

        for slice in (0..SLICE_COUNT).rev() {
            if cancel.load(Ordering::Relaxed) {
                return Err(ReconstructError::Cancelled(Stage::ProjectAndFillNear));
            }
            let bucket = slices.bucket(slice);
            if bucket.is_empty() {
                continue;
            }

            temp.clear();
            for p in bucket {
                if p.range <= 0.0 {
                    continue;
                }
                let d = p.range as f32;
                let (row, col) = (p.row(self.height), p.column(self.width));
                temp.set(row, col, d);

                if p.range < NEAR_DISTANCE_THRESHOLD {
                    let size = (DISTANCED_SIZE_FACTOR - p.range / MAX_DISTANCE * DISTANCED_SIZE_FACTOR)
                        as usize
                        + 1;
                    if row >= size && col >= size {
                        self.splat(&mut temp, row, col, size, d);
                        let size = size * 2;
                        if row >= size && col >= size {
                            self.splat(&mut acc, row, col, size, d);
                        }
                    }
                }
            }

            let kernel = close_kernel_size(slice);
            temp.close_square(kernel, kernel);
            if let Some(window) = temp.touched() {
                acc.merge_from(&temp, window);
            }
        }
        Ok(acc)
    }

    /// Write the four diagonal neighbours `size` pixels away, wrapping past
    /// the right and bottom edges.
    fn splat(&self, raster: &mut DepthRaster, row: usize, col: usize, size: usize, d: f32) {
        let (up, down) = (row - size, (row + size) % self.height);
        let (left, right) = (col - size, (col + size) % self.width);
        raster.set(up, left, d);
        raster.set(up, right, d);
        raster.set(down, left, d);
        raster.set(down, right, d);
    }

    fn denoise(&self, mut depth: DepthRaster, cancel: &AtomicBool) -> Result<DepthRaster, ReconstructError> {
        fill_holes(&mut depth, cancel)?;

        let check = || {
            if cancel.load(Ordering::Relaxed) {
                Err(ReconstructError::Cancelled(Stage::Denoise))
            } else {
                Ok(())
            }
        };
        check()?;
        let depth = depth.median3();
        check()?;
        Ok(depth.bilateral(BILATERAL_DIAMETER, BILATERAL_SIGMA_COLOR, BILATERAL_SIGMA_SPACE))
    }
}
