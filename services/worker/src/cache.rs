//! Process-wide patch cache with load deduplication and FIFO eviction.
//!
//! At most one fetch per patch id is in flight: the first caller for a
//! missing patch becomes its loader and later callers wait for that load to
//! finish. Capacity is `parallelism × patch_limit` patches and eviction is by
//! insertion order, not recency. A loader dropped mid-fetch abandons its
//! load: waiters fail with [`PatchError::Abandoned`] and the next caller
//! fetches again.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ankadepth_proto::PatchId;
use ankadepth_reconstruct::SpatialPoint;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::store::{PatchError, PatchSource};

/// Decoded points of one patch, shared between callers.
pub type PatchPoints = Arc<Vec<SpatialPoint>>;

type LoadResult = Result<PatchPoints, PatchError>;

/// Cache statistics.
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    waits: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time copy of the cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// Requests that joined a load already in flight.
    pub waits: u64,
    pub evictions: u64,
    pub resident: usize,
}

/// A load in flight and the callers waiting on it.
struct LoadInProgress {
    waiters: Vec<oneshot::Sender<LoadResult>>,
    started_at: Instant,
}

#[derive(Default)]
struct CacheState {
    resident: HashMap<PatchId, PatchPoints>,
    /// Resident ids, oldest insertion first.
    order: VecDeque<PatchId>,
    loading: HashMap<PatchId, LoadInProgress>,
    source: Option<Arc<dyn PatchSource>>,
    patch_limit: usize,
}

enum Claim {
    Hit(PatchPoints),
    Wait(oneshot::Receiver<LoadResult>),
    Load(Arc<dyn PatchSource>),
}

/// Clears the in-flight entry of a load whose loader went away.
struct LoadGuard {
    state: Arc<RwLock<CacheState>>,
    id: PatchId,
    armed: bool,
}

impl LoadGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.id;
        warn!(patch_id = %id, "Patch load abandoned");
        // Dropping the entry drops its waiters' senders.
        if let Ok(mut state) = self.state.try_write() {
            state.loading.remove(&id);
        } else if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let state = Arc::clone(&self.state);
            handle.spawn(async move {
                state.write().await.loading.remove(&id);
            });
        }
    }
}

/// Patch cache shared by every runner of a worker.
pub struct PatchCache {
    parallelism: usize,
    state: Arc<RwLock<CacheState>>,
    stats: CacheStats,
}

impl PatchCache {
    /// Create an empty cache. It serves nothing until [`PatchCache::init`].
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            state: Arc::new(RwLock::new(CacheState::default())),
            stats: CacheStats::default(),
        }
    }

    /// Attach the point-cloud source and patch limit from a configuration.
    /// Resident patches are kept; a smaller capacity takes effect on the
    /// next insert.
    pub async fn init(&self, source: Arc<dyn PatchSource>, patch_limit: u32) {
        let mut state = self.state.write().await;
        state.source = Some(source);
        state.patch_limit = patch_limit as usize;
        info!(
            parallelism = self.parallelism,
            patch_limit,
            capacity = self.parallelism * patch_limit as usize,
            "Patch cache initialised"
        );
    }

    /// Maximum number of resident patches.
    pub async fn capacity(&self) -> usize {
        self.parallelism * self.state.read().await.patch_limit
    }

    /// Load one patch, from memory when resident.
    pub async fn load_patch(&self, id: PatchId) -> Result<PatchPoints, PatchError> {
        let claim = {
            let mut state = self.state.write().await;
            if let Some(points) = state.resident.get(&id) {
                Claim::Hit(Arc::clone(points))
            } else if let Some(load) = state.loading.get_mut(&id) {
                let (tx, rx) = oneshot::channel();
                load.waiters.push(tx);
                Claim::Wait(rx)
            } else {
                let source = state.source.clone().ok_or(PatchError::NotInitialised)?;
                state.loading.insert(
                    id,
                    LoadInProgress {
                        waiters: Vec::new(),
                        started_at: Instant::now(),
                    },
                );
                Claim::Load(source)
            }
        };

        match claim {
            Claim::Hit(points) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(points)
            }
            Claim::Wait(rx) => {
                self.stats.waits.fetch_add(1, Ordering::Relaxed);
                debug!(patch_id = %id, "Patch load in flight, waiting");
                rx.await.map_err(|_| PatchError::Abandoned(id))?
            }
            Claim::Load(source) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                let guard = LoadGuard {
                    state: Arc::clone(&self.state),
                    id,
                    armed: true,
                };
                // No lock is held across the query.
                let result = source.fetch_patch(id).await.map(Arc::new);
                let result = self.complete_load(id, result).await;
                guard.disarm();
                result
            }
        }
    }

    async fn complete_load(&self, id: PatchId, result: LoadResult) -> LoadResult {
        let mut state = self.state.write().await;
        let load = state.loading.remove(&id);

        if let Ok(points) = &result {
            let capacity = self.parallelism * state.patch_limit;
            while state.resident.len() >= capacity {
                let Some(oldest) = state.order.pop_front() else {
                    break;
                };
                state.resident.remove(&oldest);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(patch_id = %oldest, "Evicted patch");
            }
            if capacity > 0 {
                state.resident.insert(id, Arc::clone(points));
                state.order.push_back(id);
            } else {
                debug!(patch_id = %id, "Cache capacity is zero, patch not kept");
            }
        }
        drop(state);

        if let Some(load) = load {
            match &result {
                Ok(points) => debug!(
                    patch_id = %id,
                    points = points.len(),
                    waiters = load.waiters.len(),
                    elapsed_ms = load.started_at.elapsed().as_millis() as u64,
                    "Patch loaded"
                ),
                Err(e) => warn!(patch_id = %id, error = %e, waiters = load.waiters.len(), "Patch load failed"),
            }
            for waiter in load.waiters {
                let _ = waiter.send(result.clone());
            }
        }
        result
    }

    /// Load several patches in order and concatenate their points. Stops at
    /// the first failure.
    pub async fn load_patches(&self, ids: &[PatchId]) -> Result<Vec<SpatialPoint>, PatchError> {
        let mut points = Vec::new();
        for &id in ids {
            let patch = self.load_patch(id).await?;
            points.extend_from_slice(&patch);
        }
        Ok(points)
    }

    /// Drop every resident patch.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let dropped = state.resident.len();
        state.resident.clear();
        state.order.clear();
        info!(dropped, "Patch cache cleared");
    }

    pub async fn is_resident(&self, id: PatchId) -> bool {
        self.state.read().await.resident.contains_key(&id)
    }

    /// Resident ids, oldest insertion first.
    pub async fn resident_ids(&self) -> Vec<PatchId> {
        self.state.read().await.order.iter().copied().collect()
    }

    pub async fn stats(&self) -> CacheStatsSnapshot {
        let resident = self.state.read().await.resident.len();
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            waits: self.stats.waits.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            resident,
        }
    }
}
