//! Region store access.
//!
//! Regions are panorama capture points in `public.panogps`. The manager
//! reads them once at startup to build its backlog.

use std::sync::{Arc, Mutex};

use ankadepth_db::{DbConfig, DbError};
use ankadepth_proto::{DbEndpoint, Task, TaskId};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;

/// Source of region tasks.
#[async_trait]
pub trait RegionSource: Send + Sync {
    /// Regions captured under any of `root_dirs`, restricted to `sub_dirs`
    /// when that list is non-empty.
    async fn load_regions(
        &self,
        root_dirs: &[String],
        sub_dirs: &[String],
    ) -> Result<Vec<Task>, DbError>;
}

const LOAD_REGIONS_SQL: &str = r#"
SELECT
    id::bigint AS id,
    coordx::float8 AS lon,
    coordy::float8 AS lat,
    altitude::float8 AS altitude,
    ST_X(ST_Transform(ST_SetSRID(ST_MakePoint(coordx, coordy), 4326), 32635))::float8 AS x,
    ST_Y(ST_Transform(ST_SetSRID(ST_MakePoint(coordx, coordy), 4326), 32635))::float8 AS y,
    dirname::text AS parent_dir,
    filename::text AS sub_dir,
    imgname::text AS file_name,
    heading::float8 AS heading,
    pitch::float8 AS pitch,
    roll::float8 AS roll,
    stamp::text AS stamp
FROM public.panogps
WHERE dirname = ANY($1)
  AND (cardinality($2::text[]) = 0 OR filename = ANY($2))
"#;

/// One region row.
struct RegionRow(Task);

impl<'r> sqlx::FromRow<'r, PgRow> for RegionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let image: String = row.try_get("file_name")?;
        Ok(Self(Task {
            id: TaskId::new(row.try_get("id")?),
            longitude: row.try_get("lon")?,
            latitude: row.try_get("lat")?,
            x: row.try_get("x")?,
            y: row.try_get("y")?,
            altitude: row.try_get("altitude")?,
            heading: row.try_get("heading")?,
            pitch: row.try_get("pitch")?,
            roll: row.try_get("roll")?,
            parent_dir: row.try_get("parent_dir")?,
            sub_dir: row.try_get("sub_dir")?,
            file_name: depth_file_name(&image),
            timestamp: row.try_get::<Option<String>, _>("stamp")?.unwrap_or_default(),
            assigned_at: None,
        }))
    }
}

/// Output file name for a source image: its stem with a `.png` extension.
pub fn depth_file_name(image: &str) -> String {
    let stem = match image.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => image,
    };
    format!("{stem}.png")
}

/// Postgres region store.
#[derive(Debug, Clone)]
pub struct PgRegionSource {
    endpoint: DbEndpoint,
    db: DbConfig,
}

impl PgRegionSource {
    pub fn new(endpoint: DbEndpoint, db: DbConfig) -> Self {
        Self { endpoint, db }
    }
}

#[async_trait]
impl RegionSource for PgRegionSource {
    async fn load_regions(
        &self,
        root_dirs: &[String],
        sub_dirs: &[String],
    ) -> Result<Vec<Task>, DbError> {
        let pool = ankadepth_db::connect(&self.endpoint, &self.db).await?;

        let rows: Result<Vec<RegionRow>, _> = sqlx::query_as(LOAD_REGIONS_SQL)
            .bind(root_dirs)
            .bind(sub_dirs)
            .fetch_all(&pool)
            .await;
        pool.close().await;

        let rows = rows.map_err(DbError::Query)?;
        debug!(regions = rows.len(), "Fetched regions");
        Ok(rows.into_iter().map(|RegionRow(task)| task).collect())
    }
}

/// In-memory region source for tests and dry runs.
///
/// Filters its regions by directory like the store does. Clones share state.
#[derive(Clone, Default)]
pub struct MockRegionSource {
    regions: Arc<Mutex<Vec<Task>>>,
    error: Arc<Mutex<Option<fn() -> DbError>>>,
}

impl MockRegionSource {
    pub fn new(regions: Vec<Task>) -> Self {
        Self {
            regions: Arc::new(Mutex::new(regions)),
            ..Self::default()
        }
    }

    /// Make every load fail with the error built by `error`.
    pub fn fail_with(&self, error: fn() -> DbError) {
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }
}

#[async_trait]
impl RegionSource for MockRegionSource {
    async fn load_regions(
        &self,
        root_dirs: &[String],
        sub_dirs: &[String],
    ) -> Result<Vec<Task>, DbError> {
        if let Some(error) = *self.error.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(error());
        }
        let regions = self.regions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(regions
            .iter()
            .filter(|task| root_dirs.contains(&task.parent_dir))
            .filter(|task| sub_dirs.is_empty() || sub_dirs.contains(&task.sub_dir))
            .cloned()
            .collect())
    }
}
