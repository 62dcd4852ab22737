//! Fixtures shared by unit and integration tests.

use ankadepth_proto::{Task, TaskId};
use ankadepth_reconstruct::SpatialPoint;

/// A task at a fixed projected position.
pub fn sample_task(id: i64) -> Task {
    Task {
        id: TaskId::new(id),
        longitude: 28.978359,
        latitude: 41.008238,
        x: 666_032.125,
        y: 4_541_236.5,
        altitude: 39.75,
        heading: 90.0,
        pitch: 0.0,
        roll: 0.0,
        parent_dir: "2019_06_12".to_string(),
        sub_dir: "track_04".to_string(),
        file_name: format!("pano_{id:06}.jpg"),
        timestamp: "2019-06-12 10:31:07.25".to_string(),
        assigned_at: None,
    }
}

/// `count` points on a horizontal ring of `radius` around the task, one
/// metre below the observer.
pub fn ring_points(task: &Task, count: usize, radius: f64) -> Vec<SpatialPoint> {
    (0..count)
        .map(|i| {
            let angle = i as f64 / count as f64 * std::f64::consts::TAU;
            SpatialPoint::with_capture(
                task.x + radius * angle.cos(),
                task.y + radius * angle.sin(),
                task.altitude - 1.0,
                i as i64,
                100,
            )
        })
        .collect()
}
