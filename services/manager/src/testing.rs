//! Fixtures shared by unit and integration tests.

use ankadepth_proto::{Task, TaskId};

/// A region under `parent_dir/sub_dir`.
pub fn region(id: i64, parent_dir: &str, sub_dir: &str) -> Task {
    Task {
        id: TaskId::new(id),
        longitude: 28.978359 + id as f64 * 1e-5,
        latitude: 41.008238,
        x: 666_032.125 + id as f64,
        y: 4_541_236.5,
        altitude: 39.75,
        heading: 90.0,
        pitch: 0.0,
        roll: 0.0,
        parent_dir: parent_dir.to_string(),
        sub_dir: sub_dir.to_string(),
        file_name: format!("pano_{id:06}.png"),
        timestamp: "2019-06-12 10:31:07.25".to_string(),
        assigned_at: None,
    }
}

/// Regions `1..=count` under one capture directory.
pub fn regions(count: i64) -> Vec<Task> {
    (1..=count).map(|id| region(id, "2019_06_12", "track_04")).collect()
}
