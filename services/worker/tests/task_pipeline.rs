//! End-to-end tests for task execution against an in-memory store.
//!
//! These tests drive a TaskRunner through patch retrieval, reconstruction
//! and image output, and check the decoded result.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ankadepth_proto::{DepthConfig, PatchId, RunnerState, Task};
use ankadepth_reconstruct::{decode_depth, ReconstructionEngine, SpatialPoint};
use ankadepth_worker::runner::output_paths;
use ankadepth_worker::testing::{ring_points, sample_task};
use ankadepth_worker::{
    MockPatchSource, PatchCache, RunnerContext, RunnerEvent, RunnerId, TaskRunner,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

const WIDTH: usize = 256;
const HEIGHT: usize = 128;

struct Setup {
    temp_dir: TempDir,
    source: MockPatchSource,
    ctx: RunnerContext,
}

/// Three patches totalling 500 points around the sample task.
fn three_patches(task: &Task) -> Vec<Vec<SpatialPoint>> {
    vec![
        ring_points(task, 200, 5.0),
        ring_points(task, 150, 12.0),
        ring_points(task, 150, 25.0),
    ]
}

async fn create_setup(patches: Vec<Vec<SpatialPoint>>, threshold: u32) -> Setup {
    let temp_dir = TempDir::new().unwrap();
    let source = MockPatchSource::new();
    for (i, points) in patches.into_iter().enumerate() {
        source.insert(PatchId::new(i as i64 + 100), points);
    }

    let config = DepthConfig {
        ank_root: temp_dir.path().join("ank").to_string_lossy().into_owned(),
        output_root: temp_dir.path().join("out").to_string_lossy().into_owned(),
        patch_limit: 250,
        patch_threshold: threshold,
        ..DepthConfig::default()
    };
    let cache = Arc::new(PatchCache::new(2));
    cache.init(Arc::new(source.clone()), config.patch_limit).await;

    let ctx = RunnerContext {
        config: Arc::new(config),
        source: Arc::new(source.clone()),
        cache,
        engine: ReconstructionEngine::new(WIDTH, HEIGHT),
    };
    Setup {
        temp_dir,
        source,
        ctx,
    }
}

async fn execute(ctx: &RunnerContext, task: Task) -> (RunnerState, Vec<RunnerEvent>) {
    let (tx, mut rx) = mpsc::channel(64);
    let runner = TaskRunner::new(RunnerId(1), task, Arc::new(AtomicBool::new(false)), tx);
    let state = runner.execute(ctx.clone()).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (state, events)
}

fn output_file(root: &Path, task: &Task) -> std::path::PathBuf {
    output_paths(&root.join("out"), task).1
}

#[tokio::test]
async fn test_task_with_enough_patches_completes() {
    let task = sample_task(11);
    let setup = create_setup(three_patches(&task), 3).await;

    let (state, events) = execute(&setup.ctx, task.clone()).await;

    assert_eq!(state, RunnerState::Completed);
    assert_eq!(setup.source.fetch_count(), 3);
    assert!(matches!(
        events.last(),
        Some(RunnerEvent::Finished {
            state: RunnerState::Completed,
            ..
        })
    ));

    let file = output_file(setup.temp_dir.path(), &task);
    let image = image::open(&file).unwrap().to_rgb8();
    assert_eq!(image.dimensions(), (WIDTH as u32, HEIGHT as u32));

    let depths: Vec<f64> = image.pixels().map(|p| decode_depth(*p)).collect();
    assert!(depths.iter().any(|&d| d > 0.0));
    assert!(depths.iter().all(|&d| d < 40.0));
}

#[tokio::test]
async fn test_horizon_row_sees_ring_distance() {
    let task = sample_task(12);
    // A cylindrical wall at 10 m, up to one metre above and below the
    // observer, tall enough to survive the median filter.
    let altitude = task.altitude;
    let wall: Vec<SpatialPoint> = (-10..=10)
        .flat_map(|level| {
            ring_points(&task, 720, 10.0).into_iter().map(move |mut p| {
                p.z = altitude + f64::from(level) * 0.1;
                p
            })
        })
        .collect();
    let setup = create_setup(vec![wall], 1).await;

    let (state, _) = execute(&setup.ctx, task.clone()).await;
    assert_eq!(state, RunnerState::Completed);

    let image = image::open(output_file(setup.temp_dir.path(), &task))
        .unwrap()
        .to_rgb8();
    let near_ring = image
        .pixels()
        .map(|p| decode_depth(*p))
        .filter(|&d| (10.0..10.1).contains(&d))
        .count();
    assert!(near_ring > 0);
}

#[tokio::test]
async fn test_task_below_threshold_fails_without_output() {
    let task = sample_task(13);
    let setup = create_setup(three_patches(&task), 4).await;

    let (state, events) = execute(&setup.ctx, task.clone()).await;

    assert_eq!(state, RunnerState::ErrorState);
    assert!(!output_file(setup.temp_dir.path(), &task).exists());
    assert!(events.iter().any(|e| matches!(
        e,
        RunnerEvent::Log { text, .. } if text.contains("Not enough patches")
    )));
}

#[tokio::test]
async fn test_repeated_task_reuses_cached_patches() {
    let task = sample_task(14);
    let mut setup = create_setup(three_patches(&task), 3).await;
    Arc::get_mut(&mut setup.ctx.config).unwrap().worker_reprocess = true;

    execute(&setup.ctx, task.clone()).await;
    let (state, _) = execute(&setup.ctx, task).await;

    assert_eq!(state, RunnerState::Completed);
    assert_eq!(setup.source.fetch_count(), 3);
    assert_eq!(setup.ctx.cache.stats().await.hits, 3);
}

#[tokio::test]
async fn test_calibration_file_is_applied() {
    let task = sample_task(15);
    let setup = create_setup(vec![ring_points(&task, 10, 30.0)], 1).await;
    let setup_dir = setup
        .temp_dir
        .path()
        .join("ank")
        .join(&task.parent_dir)
        .join(&task.sub_dir);
    std::fs::create_dir_all(&setup_dir).unwrap();
    std::fs::write(
        setup_dir.join("setup.ank"),
        r#"{"camheight": 3.5, "roll": 0, "pitch": 0, "heading": 0}"#,
    )
    .unwrap();

    let (state, events) = execute(&setup.ctx, task.clone()).await;
    assert_eq!(state, RunnerState::Completed);
    assert!(!events.iter().any(|e| matches!(
        e,
        RunnerEvent::Log { text, .. } if text.contains("setup.ank")
    )));

    // The closest synthesized ground is at the calibrated camera height.
    let image = image::open(output_file(setup.temp_dir.path(), &task))
        .unwrap()
        .to_rgb8();
    let min = image
        .pixels()
        .map(|p| decode_depth(*p))
        .filter(|&d| d > 0.0)
        .fold(f64::MAX, f64::min);
    assert!(min > 3.0, "closest depth {min}");
}
