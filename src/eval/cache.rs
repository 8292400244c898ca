// eval/cache.rs - LRU preview cache keyed by procedure content
//
// A preview is identified by the bytes `Procedure::write_to` produces plus
// the grid settings, so two procedures that serialize identically share
// cache entries no matter how they were built. Results sit behind `Arc`:
// a hit is a reference count bump, not a buffer copy.

use crate::error::{PoolError, ProcError};
use crate::eval::graph::Procedure;
use crate::eval::grid::{duplicate_lanes, render_grid, GridResult, GridSettings};
use crate::pool::{PoolConfig, WorkerPool};
use log::debug;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct PreviewCache {
    grids: Mutex<LruCache<u64, Arc<GridResult>>>,
}

impl PreviewCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        PreviewCache {
            grids: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<u64, Arc<GridResult>>> {
        self.grids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: u64) -> Option<Arc<GridResult>> {
        self.lock().get(&key).cloned()
    }

    pub fn put(&self, key: u64, result: GridResult) -> Arc<GridResult> {
        let result = Arc::new(result);
        self.lock().put(key, Arc::clone(&result));
        result
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Keys ───────────────────────────────────────────────────────────

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Hash of the procedure's binary encoding.
pub fn procedure_hash(proc: &Procedure) -> Result<u64, ProcError> {
    Ok(hash_bytes(&proc.to_bytes()?))
}

/// Cache key for rendering `settings` with a procedure of hash `graph`.
pub fn preview_key(graph: u64, settings: &GridSettings) -> Result<u64, ProcError> {
    let mut hasher = DefaultHasher::new();
    "grid".hash(&mut hasher);
    graph.hash(&mut hasher);
    bincode::serialize(settings)?.hash(&mut hasher);
    Ok(hasher.finish())
}

// ── Previewer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub capacity: usize,
    pub pool: PoolConfig,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        PreviewConfig {
            capacity: 32,
            pool: PoolConfig::default(),
        }
    }
}

/// Renders previews on a private pool, caching results by content.
///
/// Pool lanes are refreshed from the procedure passed to `render` only when
/// its content differs from what the lanes were built from.
pub struct Previewer {
    pool: WorkerPool<Procedure>,
    cache: PreviewCache,
    lanes_hash: u64,
    dirty: Arc<AtomicBool>,
}

impl Previewer {
    pub fn new(proc: &Procedure, config: &PreviewConfig) -> Result<Self, PoolError> {
        let lanes = duplicate_lanes(proc, config.pool.thread_count());
        Ok(Previewer {
            pool: WorkerPool::new(lanes)?,
            cache: PreviewCache::new(config.capacity),
            lanes_hash: procedure_hash(proc)?,
            dirty: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Subscribe to `proc`'s edits so `is_dirty` reports them.
    pub fn watch(&self, proc: &mut Procedure) {
        let dirty = Arc::clone(&self.dirty);
        proc.on_change(move |_| dirty.store(true, Ordering::Release));
    }

    /// Whether the watched procedure changed since the last render.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn render(
        &mut self,
        proc: &Procedure,
        settings: &GridSettings,
    ) -> Result<Arc<GridResult>, PoolError> {
        self.dirty.store(false, Ordering::Release);
        let graph = procedure_hash(proc)?;
        let key = preview_key(graph, settings)?;
        if let Some(hit) = self.cache.get(key) {
            debug!("preview cache hit {key:016x}");
            return Ok(hit);
        }

        if graph != self.lanes_hash {
            debug!("procedure changed; refreshing {} lanes", self.pool.threads());
            self.pool
                .replace_lanes(duplicate_lanes(proc, self.pool.threads()))?;
            self.lanes_hash = graph;
        }
        let grid = render_grid(&mut self.pool, settings)?;
        Ok(self.cache.put(key, grid))
    }

    pub fn cache(&self) -> &PreviewCache {
        &self.cache
    }

    pub fn finish(mut self) -> Result<(), PoolError> {
        self.pool.finish()
    }
}
