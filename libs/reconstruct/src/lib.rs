//! Dense equirectangular depth images from sparse LiDAR returns.
//!
//! [`DistanceSlices::build`] faces the points to the capture pose, then
//! [`ReconstructionEngine::reconstruct`] projects them, synthesises the near
//! ground, denoises and encodes the result. Every stage polls a shared
//! cancellation flag at its loop heads.

pub mod codec;
pub mod engine;
pub mod error;
pub mod filter;
pub mod ground;
pub mod point;
pub mod raster;

pub use codec::{decode_depth, encode_depth, encode_raster, save_png, PIXEL_MULTIPLIER};
pub use engine::{
    close_kernel_size, DistanceSlices, Pose, ReconstructionEngine, Stage, DISTANCE_SLICE,
    IMAGE_HEIGHT, IMAGE_WIDTH, MAX_DISTANCE, NEAR_DISTANCE_THRESHOLD,
};
pub use error::ReconstructError;
pub use filter::average_distance;
pub use ground::{rotation_matrix, Calibration, DEFAULT_CAMERA_HEIGHT};
pub use point::SpatialPoint;
pub use raster::{DepthRaster, Window};
