//! Region task descriptor and its wire representation.

use chrono::{DateTime, Utc};

use crate::{ProtoError, TaskId, DATA_SEPARATOR};

/// Number of items in a serialized task.
const TASK_FIELDS: usize = 13;

/// One region to reconstruct: where the capture was taken, how the vehicle
/// was oriented, where the output goes and when the capture happened.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub longitude: f64,
    pub latitude: f64,
    /// Projected easting.
    pub x: f64,
    /// Projected northing.
    pub y: f64,
    pub altitude: f64,
    pub heading: f64,
    pub pitch: f64,
    pub roll: f64,
    pub parent_dir: String,
    pub sub_dir: String,
    pub file_name: String,
    /// Capture time, `YYYY-MM-DD HH:MM:SS.FF`, passed to the point-cloud
    /// store verbatim.
    pub timestamp: String,
    /// Set by the manager when the task is handed to a worker. Not part of
    /// the wire representation.
    pub assigned_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Output file stem: the file name up to its first dot.
    pub fn file_stem(&self) -> &str {
        self.file_name
            .split('.')
            .next()
            .unwrap_or(self.file_name.as_str())
    }

    /// Serialize to the data-separated representation carried by
    /// TASK_EXECUTE.
    pub fn encode(&self) -> String {
        let items = [
            self.id.to_string(),
            format!("{:.12}", self.longitude),
            format!("{:.12}", self.latitude),
            format!("{:.12}", self.x),
            format!("{:.12}", self.y),
            format!("{:.12}", self.altitude),
            format!("{:.12}", self.heading),
            format!("{:.12}", self.pitch),
            format!("{:.12}", self.roll),
            self.parent_dir.clone(),
            self.sub_dir.clone(),
            self.file_name.clone(),
            self.timestamp.clone(),
        ];
        items.join(&DATA_SEPARATOR.to_string())
    }

    /// Parse the representation produced by [`Task::encode`].
    pub fn decode(s: &str) -> Result<Self, ProtoError> {
        let items: Vec<&str> = s.split(DATA_SEPARATOR).collect();
        if items.len() != TASK_FIELDS {
            return Err(ProtoError::FieldCount {
                message: "task",
                expected: TASK_FIELDS,
                actual: items.len(),
            });
        }

        Ok(Self {
            id: items[0].parse()?,
            longitude: parse_f64("longitude", items[1])?,
            latitude: parse_f64("latitude", items[2])?,
            x: parse_f64("x", items[3])?,
            y: parse_f64("y", items[4])?,
            altitude: parse_f64("altitude", items[5])?,
            heading: parse_f64("heading", items[6])?,
            pitch: parse_f64("pitch", items[7])?,
            roll: parse_f64("roll", items[8])?,
            parent_dir: items[9].to_string(),
            sub_dir: items[10].to_string(),
            file_name: items[11].to_string(),
            timestamp: items[12].to_string(),
            assigned_at: None,
        })
    }
}

fn parse_f64(field: &'static str, value: &str) -> Result<f64, ProtoError> {
    value
        .trim()
        .parse()
        .map_err(|_| ProtoError::invalid(field, value))
}
