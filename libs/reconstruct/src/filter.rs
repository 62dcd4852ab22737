//! Hole filling for the lower hemisphere.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{DepthRaster, ReconstructError, Stage};

/// Polar angle (degrees) from which empty pixels are filled.
const HOLE_FILL_START_ANGLE: f64 = 100.0;

/// Neighbourhood size used to fill a hole.
const HOLE_FILL_SIZE: usize = 4;

/// Mean of the positive pixels in the `size`×`size` neighbourhood around
/// (`row`, `col`), wrapping at the image borders. Returns 0 when the
/// neighbourhood is empty.
pub fn average_distance(raster: &DepthRaster, row: usize, col: usize, size: usize) -> f32 {
    let (rows, cols) = (raster.height() as isize, raster.width() as isize);
    let half = (size / 2) as isize;
    let (row, col) = (row as isize, col as isize);

    let mut sum = 0.0f64;
    let mut count = 0usize;
    for i in row - half..=row + half {
        // Indices before the start mirror past the end, then everything wraps.
        let r = if i >= 0 { i } else { rows - i };
        for j in col - half..=col + half {
            let c = if j >= 0 { j } else { cols - j };
            let d = raster.get((r % rows) as usize, (c % cols) as usize);
            if d > 0.0 {
                sum += f64::from(d);
                count += 1;
            }
        }
    }

    if count > 0 {
        (sum / count as f64) as f32
    } else {
        0.0
    }
}

/// Fill every empty pixel below the hole-fill angle, top to bottom, with the
/// mean of its neighbourhood. Filled pixels feed the pixels after them.
pub(crate) fn fill_holes(raster: &mut DepthRaster, cancel: &AtomicBool) -> Result<(), ReconstructError> {
    let start = (HOLE_FILL_START_ANGLE * raster.height() as f64 / 180.0) as usize;
    for row in start..raster.height() {
        if cancel.load(Ordering::Relaxed) {
            return Err(ReconstructError::Cancelled(Stage::Denoise));
        }
        for col in 0..raster.width() {
            if raster.get(row, col) == 0.0 {
                let d = average_distance(raster, row, col, HOLE_FILL_SIZE);
                if d > 0.0 {
                    raster.set(row, col, d);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_ignores_empty_pixels() {
        let mut raster = DepthRaster::new(10, 10);
        raster.set(4, 4, 2.0);
        raster.set(5, 6, 4.0);
        assert_eq!(average_distance(&raster, 5, 5, 4), 3.0);
        assert_eq!(average_distance(&raster, 0, 0, 4), 0.0);
    }

    #[test]
    fn test_average_wraps_columns() {
        let mut raster = DepthRaster::new(10, 10);
        raster.set(5, 0, 6.0);
        assert_eq!(average_distance(&raster, 5, 9, 4), 6.0);
    }

    #[test]
    fn test_average_mirrors_negative_rows() {
        let mut raster = DepthRaster::new(10, 10);
        // Row -1 reads row 1, row -2 reads row 2.
        raster.set(1, 3, 5.0);
        assert_eq!(average_distance(&raster, 0, 3, 4), 5.0);
        let mut other = DepthRaster::new(10, 10);
        other.set(9, 3, 5.0);
        assert_eq!(average_distance(&other, 0, 3, 4), 0.0);
    }

    #[test]
    fn test_fill_holes_only_lower_region() {
        let mut raster = DepthRaster::new(36, 18);
        for col in 0..36 {
            raster.set(0, col, 9.0);
            raster.set(11, col, 3.0);
        }
        raster.set(11, 5, 0.0);
        raster.set(1, 5, 0.0);

        fill_holes(&mut raster, &AtomicBool::new(false)).unwrap();

        // 100 degrees is row 10 here.
        assert_eq!(raster.get(11, 5), 3.0);
        assert_eq!(raster.get(12, 5), 3.0);
        assert_eq!(raster.get(5, 5), 0.0);
        assert_eq!(raster.get(9, 5), 0.0);
    }

    #[test]
    fn test_fill_holes_cancelled() {
        let mut raster = DepthRaster::new(36, 18);
        let err = fill_holes(&mut raster, &AtomicBool::new(true)).unwrap_err();
        assert!(matches!(err, ReconstructError::Cancelled(Stage::Denoise)));
    }
}
