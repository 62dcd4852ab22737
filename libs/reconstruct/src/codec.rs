//! Fixed-point depth encoding into 8-bit RGB pixels.
//!
//! A distance is stored in millimetres as a 24-bit integer: high byte in red,
//! middle byte in blue, low byte in green. The all-zero pixel is the no-data
//! sentinel.

use std::path::Path;

use image::{Rgb, RgbImage};

use crate::{DepthRaster, ReconstructError};

/// Fixed-point units per distance unit.
pub const PIXEL_MULTIPLIER: f64 = 1000.0;

/// Largest encodable fixed-point value.
const MAX_ENCODED: u32 = 0x00FF_FFFF;

/// Depths are widened to `f64` so every millimetre of the 24-bit range
/// survives the scaling.
pub fn encode_depth(distance: f64) -> Rgb<u8> {
    if distance <= 0.0 || distance.is_nan() {
        return Rgb([0, 0, 0]);
    }
    let d = ((distance * PIXEL_MULTIPLIER).round() as u32).min(MAX_ENCODED);
    Rgb([(d >> 16) as u8, d as u8, (d >> 8) as u8])
}

pub fn decode_depth(pixel: Rgb<u8>) -> f64 {
    let [r, g, b] = pixel.0;
    let d = (u32::from(r) << 16) | (u32::from(b) << 8) | u32::from(g);
    f64::from(d) / PIXEL_MULTIPLIER
}

/// Encode every positive pixel of `raster`; everything else stays zero.
pub fn encode_raster(raster: &DepthRaster) -> RgbImage {
    let width = raster.width();
    let pixels = raster.pixels();
    RgbImage::from_fn(width as u32, raster.height() as u32, |x, y| {
        encode_depth(f64::from(pixels[y as usize * width + x as usize]))
    })
}

/// Write an encoded depth image as PNG.
pub fn save_png(image: &RgbImage, path: &Path) -> Result<(), ReconstructError> {
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|source| ReconstructError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_zero_is_no_data() {
        assert_eq!(encode_depth(0.0), Rgb([0, 0, 0]));
        assert_eq!(encode_depth(-3.0), Rgb([0, 0, 0]));
        assert_eq!(decode_depth(Rgb([0, 0, 0])), 0.0);
    }

    #[test]
    fn test_channel_layout() {
        // 12.345678 -> 12346 = 0x00_30_3A
        assert_eq!(encode_depth(12.345678), Rgb([0x00, 0x3A, 0x30]));
        // 1000.0 -> 1_000_000 = 0x0F_42_40
        assert_eq!(encode_depth(1000.0), Rgb([0x0F, 0x40, 0x42]));
    }

    #[test]
    fn test_clamps_to_24_bits() {
        assert_eq!(encode_depth(1.0e9), Rgb([0xFF, 0xFF, 0xFF]));
    }

    #[test]
    fn test_save_png_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("depth.png");
        let mut raster = DepthRaster::new(8, 4);
        raster.set(1, 2, 7.25);
        raster.set(3, 7, 39.5);

        save_png(&encode_raster(&raster), &path).unwrap();

        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.dimensions(), (8, 4));
        assert_eq!(decode_depth(*loaded.get_pixel(2, 1)), 7.25);
        assert_eq!(decode_depth(*loaded.get_pixel(7, 3)), 39.5);
        assert_eq!(*loaded.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_save_png_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("depth.png");
        let err = save_png(&RgbImage::new(2, 2), &path).unwrap_err();
        assert!(matches!(err, ReconstructError::Write { .. }));
    }

    #[test]
    fn test_every_millimetre_round_trips() {
        for mm in 0..=MAX_ENCODED {
            let distance = f64::from(mm) / 1000.0;
            let decoded = decode_depth(encode_depth(distance));
            assert_eq!(decoded, distance, "{mm} mm");
        }
    }

    proptest! {
        #[test]
        fn prop_rounds_to_millimetres(distance in 0.0f64..16_777.215) {
            let decoded = decode_depth(encode_depth(distance));
            let expected = (distance * 1000.0).round() / 1000.0;
            prop_assert_eq!(decoded, expected);
        }
    }
}
