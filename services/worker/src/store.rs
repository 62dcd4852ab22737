//! Point-cloud store access.
//!
//! The store is a PostGIS point-cloud database holding pre-grouped patches of
//! LiDAR returns. [`PatchSource`] abstracts it so the cache and runners can be
//! exercised against an in-memory [`MockPatchSource`].

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ankadepth_db::DbConfig;
use ankadepth_proto::{DbEndpoint, PatchId, Task};
use ankadepth_reconstruct::{SpatialPoint, MAX_DISTANCE};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use thiserror::Error;
use tracing::debug;

/// Patches whose mean capture time is further than this from the task
/// timestamp are ignored (seconds).
pub const PATCH_TIME_WINDOW_SECS: f64 = 50.0;

/// Errors raised while retrieving patches.
///
/// Cloneable so one failed load can be handed to every caller waiting on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// Failed to reach the point-cloud store.
    #[error("point cloud database connection error: {0}")]
    Connect(String),

    /// A query against the point-cloud store failed.
    #[error("point cloud database error: {0}")]
    Query(String),

    /// The patch does not exist in the store.
    #[error("patch {0} not found")]
    NotFound(PatchId),

    /// The cache was used before a configuration was received.
    #[error("patch cache is not initialised")]
    NotInitialised,

    /// The loader of a shared patch went away without a result.
    #[error("load of patch {0} was abandoned")]
    Abandoned(PatchId),
}

impl PatchError {
    fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                Self::Connect(err.to_string())
            }
            other => Self::Query(other.to_string()),
        }
    }
}

/// Source of point-cloud patches.
#[async_trait]
pub trait PatchSource: Send + Sync {
    /// Ids of the patches within reconstruction range of the task and close
    /// to its capture time, ascending, at most `limit`.
    async fn find_patches(&self, task: &Task, limit: u32) -> Result<Vec<PatchId>, PatchError>;

    /// Every point of one patch, in projected coordinates.
    async fn fetch_patch(&self, id: PatchId) -> Result<Vec<SpatialPoint>, PatchError>;
}

/// Builds a [`PatchSource`] for the point-cloud endpoint of a configuration.
pub trait PatchSourceFactory: Send + Sync {
    fn connect(&self, endpoint: &DbEndpoint) -> Result<Arc<dyn PatchSource>, PatchError>;
}

const FIND_PATCHES_SQL: &str = r#"
WITH patches AS (
    SELECT
        ((PC_PatchMax(pa, 'gpstime') + PC_PatchMin(pa, 'gpstime')) / 2.0) / 1000000 AS patch_time_avg,
        (SELECT regexp_matches(filename, '(20[0-9]{2}.[0-9]{2}.[0-9]{2})', 'g'))[1] AS patch_date,
        *
    FROM pc_table
    WHERE PC_Intersects(
        ST_Transform(ST_Buffer(ST_Transform(ST_GeomFromText($1, 4326), 32635), $2), 4326),
        pa
    )
)
SELECT id::bigint AS id
FROM patches
WHERE ABS(
    (date_part('epoch', to_timestamp(patch_date, 'YYYY-MM-DD')) + patch_time_avg)
    - date_part('epoch', to_timestamp($3, 'YYYY-MM-DD HH24:MI:SS.US'))
) < $4
ORDER BY id
LIMIT $5
"#;

const FETCH_PATCH_SQL: &str = r#"
WITH points AS (
    SELECT PC_Explode(pa) AS point
    FROM pc_table
    WHERE id = $1
)
SELECT
    ST_X(ST_Transform(point::geometry, 32635)) AS x,
    ST_Y(ST_Transform(point::geometry, 32635)) AS y,
    ST_Z(ST_Transform(point::geometry, 32635)) AS z,
    PC_Get(point, 'gpstime')::float8 AS gpstime,
    PC_Get(point, 'intensity')::float8 AS intensity
FROM points
"#;

/// One exploded point row.
struct PointRow(SpatialPoint);

impl<'r> sqlx::FromRow<'r, PgRow> for PointRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let time: Option<f64> = row.try_get("gpstime")?;
        let intensity: Option<f64> = row.try_get("intensity")?;
        Ok(Self(SpatialPoint::with_capture(
            row.try_get("x")?,
            row.try_get("y")?,
            row.try_get("z")?,
            time.unwrap_or_default() as i64,
            intensity.unwrap_or_default() as i32,
        )))
    }
}

/// Postgres point-cloud store.
#[derive(Clone)]
pub struct PgPatchSource {
    pool: PgPool,
}

impl PgPatchSource {
    /// Build a pool that connects on first use.
    pub fn connect_lazy(endpoint: &DbEndpoint, config: &DbConfig) -> Self {
        Self {
            pool: ankadepth_db::connect_lazy(endpoint, config),
        }
    }
}

#[async_trait]
impl PatchSource for PgPatchSource {
    async fn find_patches(&self, task: &Task, limit: u32) -> Result<Vec<PatchId>, PatchError> {
        let point = format!("Point({:.12} {:.12})", task.longitude, task.latitude);
        let rows = sqlx::query(FIND_PATCHES_SQL)
            .bind(point)
            .bind(MAX_DISTANCE.trunc())
            .bind(&task.timestamp)
            .bind(PATCH_TIME_WINDOW_SECS)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(PatchError::from_sqlx)?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map(PatchId::new))
            .collect::<Result<_, _>>()
            .map_err(PatchError::from_sqlx)
    }

    async fn fetch_patch(&self, id: PatchId) -> Result<Vec<SpatialPoint>, PatchError> {
        let rows: Vec<PointRow> = sqlx::query_as(FETCH_PATCH_SQL)
            .bind(id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(PatchError::from_sqlx)?;
        debug!(patch_id = %id, points = rows.len(), "Fetched patch");
        Ok(rows.into_iter().map(|PointRow(p)| p).collect())
    }
}

/// Connects to Postgres using [`PgPatchSource::connect_lazy`].
#[derive(Debug, Clone, Default)]
pub struct PgPatchSourceFactory {
    pub db: DbConfig,
}

impl PatchSourceFactory for PgPatchSourceFactory {
    fn connect(&self, endpoint: &DbEndpoint) -> Result<Arc<dyn PatchSource>, PatchError> {
        Ok(Arc::new(PgPatchSource::connect_lazy(endpoint, &self.db)))
    }
}

#[derive(Default)]
struct MockState {
    patches: BTreeMap<PatchId, Vec<SpatialPoint>>,
    failing: HashSet<PatchId>,
    find_error: Option<PatchError>,
}

/// In-memory patch source for tests and dry runs.
///
/// Every stored patch matches every task. Clones share state.
#[derive(Clone, Default)]
pub struct MockPatchSource {
    state: Arc<Mutex<MockState>>,
    fetches: Arc<AtomicUsize>,
    fetch_delay: Duration,
}

impl MockPatchSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch, to widen race windows in tests.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn insert(&self, id: PatchId, points: Vec<SpatialPoint>) {
        if let Ok(mut state) = self.state.lock() {
            state.patches.insert(id, points);
        }
    }

    /// Make fetches of `id` fail with a query error.
    pub fn fail_patch(&self, id: PatchId) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.insert(id);
        }
    }

    /// Make patch lookups fail with `err`.
    pub fn fail_find(&self, err: PatchError) {
        if let Ok(mut state) = self.state.lock() {
            state.find_error = Some(err);
        }
    }

    /// Number of fetches issued so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PatchSource for MockPatchSource {
    async fn find_patches(&self, _task: &Task, limit: u32) -> Result<Vec<PatchId>, PatchError> {
        let state = self
            .state
            .lock()
            .map_err(|_| PatchError::Query("mock state poisoned".to_string()))?;
        if let Some(err) = &state.find_error {
            return Err(err.clone());
        }
        Ok(state.patches.keys().copied().take(limit as usize).collect())
    }

    async fn fetch_patch(&self, id: PatchId) -> Result<Vec<SpatialPoint>, PatchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        let state = self
            .state
            .lock()
            .map_err(|_| PatchError::Query("mock state poisoned".to_string()))?;
        if state.failing.contains(&id) {
            return Err(PatchError::Query(format!("patch {id} unavailable")));
        }
        state.patches.get(&id).cloned().ok_or(PatchError::NotFound(id))
    }
}

impl PatchSourceFactory for MockPatchSource {
    fn connect(&self, _endpoint: &DbEndpoint) -> Result<Arc<dyn PatchSource>, PatchError> {
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_find_is_sorted_and_limited() {
        let source = MockPatchSource::new();
        for id in [7, 3, 5] {
            source.insert(PatchId::new(id), vec![SpatialPoint::new(1.0, 2.0, 3.0)]);
        }
        let task = crate::testing::sample_task(1);
        let ids = source.find_patches(&task, 2).await.unwrap();
        assert_eq!(ids, vec![PatchId::new(3), PatchId::new(5)]);
    }

    #[tokio::test]
    async fn test_mock_fetch_counts_and_fails() {
        let source = MockPatchSource::new();
        source.insert(PatchId::new(1), vec![SpatialPoint::new(1.0, 2.0, 3.0)]);
        source.fail_patch(PatchId::new(2));

        assert_eq!(source.fetch_patch(PatchId::new(1)).await.unwrap().len(), 1);
        assert!(matches!(
            source.fetch_patch(PatchId::new(2)).await,
            Err(PatchError::Query(_))
        ));
        assert_eq!(
            source.fetch_patch(PatchId::new(9)).await,
            Err(PatchError::NotFound(PatchId::new(9)))
        );
        assert_eq!(source.fetch_count(), 3);
    }
}
