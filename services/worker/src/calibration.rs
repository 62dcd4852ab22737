//! Per-capture calibration file (`setup.ank`).
//!
//! A JSON object with `camheight`, `roll`, `pitch` and `heading`. All four
//! keys must be present; a missing, unreadable or partial file leaves the
//! runner on [`Calibration::default`].

use std::path::{Path, PathBuf};

use ankadepth_reconstruct::Calibration;
use serde_json::{Map, Value};
use thiserror::Error;

/// File name of the calibration file inside a capture directory.
pub const CALIBRATION_FILE: &str = "setup.ank";

const REQUIRED_KEYS: [&str; 4] = ["camheight", "roll", "pitch", "heading"];

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("setup.ank couldn't be located at path, defaults loaded. {}", .0.display())]
    Missing(PathBuf),

    #[error("setup.ank couldn't be read, defaults loaded. {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("setup.ank has unknown JSON format, defaults loaded. {}", .0.display())]
    Malformed(PathBuf),

    #[error("setup.ank has incomplete JSON, defaults loaded. {}", .0.display())]
    Incomplete(PathBuf),
}

/// Path of the calibration file for a capture directory.
pub fn calibration_path(ank_root: &Path, parent_dir: &str, sub_dir: &str) -> PathBuf {
    ank_root.join(parent_dir).join(sub_dir).join(CALIBRATION_FILE)
}

/// Read and parse a calibration file.
pub fn load_calibration(path: &Path) -> Result<Calibration, CalibrationError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CalibrationError::Missing(path.to_path_buf()))
        }
        Err(source) => {
            return Err(CalibrationError::Unreadable {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_calibration(&text).map_err(|kind| kind.at(path))
}

enum ParseFailure {
    Malformed,
    Incomplete,
}

impl ParseFailure {
    fn at(self, path: &Path) -> CalibrationError {
        match self {
            Self::Malformed => CalibrationError::Malformed(path.to_path_buf()),
            Self::Incomplete => CalibrationError::Incomplete(path.to_path_buf()),
        }
    }
}

fn parse_calibration(text: &str) -> Result<Calibration, ParseFailure> {
    let value: Value = serde_json::from_str(text).map_err(|_| ParseFailure::Malformed)?;
    let object = match value {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    if !REQUIRED_KEYS.iter().all(|key| object.contains_key(*key)) {
        return Err(ParseFailure::Incomplete);
    }

    // Non-numeric values read as zero.
    let number = |key: &str| object.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    Ok(Calibration {
        camera_height: number("camheight"),
        heading_offset: number("heading"),
        pitch_offset: number("pitch"),
        roll_offset: number("roll"),
    })
}
