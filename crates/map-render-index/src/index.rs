//! The synchronized spatial index
//!
//! [`SpatialIndex`] owns the [`QuadTree`] behind the single structural lock.
//! Every operation that touches tree shape, node membership or an item's
//! back-reference goes through that lock. Bounds changes reported from other
//! threads travel through a message queue that is drained under the lock, so
//! an item is always observed in either its old or its new cell.

use crate::bounds::GeoBounds;
use crate::config::IndexConfig;
use crate::frustum::Frustum;
use crate::item::{ItemRef, MapItem, RenderPass};
use crate::quadtree::{CollectQuery, NodeId, QuadTree, Visible};
use crate::scene::ViewState;
use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

static NEXT_TREE_ID: AtomicU64 = AtomicU64::new(1);

/// Callback run whenever the index content changes
pub type InvalidationListener = Arc<dyn Fn() + Send + Sync>;

/// Cooperative cancellation shared by a query producer and its traversals.
///
/// Each [`AbortToken`] remembers the epoch it was issued in; bumping the epoch
/// with [`AbortSignal::abort`] cancels every outstanding token.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    epoch: Arc<AtomicU64>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that fires on the next [`AbortSignal::abort`]
    pub fn token(&self) -> AbortToken {
        AbortToken {
            epoch: Some(Arc::clone(&self.epoch)),
            issued: self.epoch.load(Ordering::Acquire),
        }
    }

    /// Cancel every token issued so far
    pub fn abort(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

/// Checked by traversals between items and between cells
#[derive(Debug, Clone)]
pub struct AbortToken {
    epoch: Option<Arc<AtomicU64>>,
    issued: u64,
}

impl AbortToken {
    /// A token that never fires
    pub fn never() -> Self {
        Self {
            epoch: None,
            issued: 0,
        }
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.epoch
            .as_ref()
            .is_some_and(|epoch| epoch.load(Ordering::Acquire) != self.issued)
    }
}

/// Thread-safe quadtree of map items
pub struct SpatialIndex {
    config: IndexConfig,
    tree: Mutex<QuadTree>,
    bounds_tx: Sender<ItemRef>,
    bounds_rx: Receiver<ItemRef>,
    listener: RwLock<Option<InvalidationListener>>,
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("config", &self.config)
            .field("pending_bounds_changes", &self.bounds_rx.len())
            .finish_non_exhaustive()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SpatialIndex {
    /// Create an empty index. The config is assumed validated.
    pub fn new(config: IndexConfig) -> Self {
        let tree_id = NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed);
        let (bounds_tx, bounds_rx) = crossbeam_channel::unbounded();
        Self {
            tree: Mutex::new(QuadTree::new(tree_id, config.max_depth)),
            config,
            bounds_tx,
            bounds_rx,
            listener: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Install the callback run after every content change
    pub fn set_invalidation_listener(&self, listener: Option<InvalidationListener>) {
        *self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    /// Insert one item. Returns false if it is already held by an index.
    pub fn insert(&self, item: ItemRef) -> bool {
        let inserted = {
            let mut tree = self.lock_tree();
            self.drain_bounds_changes(&mut tree);
            tree.insert(item)
        };
        if inserted {
            self.invalidate();
        }
        inserted
    }

    /// Insert many items, computing their bounds in parallel first.
    ///
    /// Returns how many were inserted.
    pub fn insert_all(&self, items: Vec<ItemRef>) -> usize {
        #[cfg(feature = "profiling")]
        profiling::scope!("index::insert_all");

        let with_bounds: Vec<(ItemRef, GeoBounds)> = items
            .into_par_iter()
            .map(|item| {
                let bounds = item.bounds();
                (item, bounds)
            })
            .collect();

        let inserted = {
            let mut tree = self.lock_tree();
            self.drain_bounds_changes(&mut tree);
            with_bounds
                .into_iter()
                .filter(|(item, bounds)| tree.insert_with_bounds(Arc::clone(item), *bounds))
                .count()
        };
        tracing::debug!(inserted, "Bulk insert finished");
        if inserted > 0 {
            self.invalidate();
        }
        inserted
    }

    /// Remove one item. Returns false, after logging, if it was not held here.
    pub fn remove(&self, item: &dyn MapItem) -> bool {
        let removed = {
            let mut tree = self.lock_tree();
            self.drain_bounds_changes(&mut tree);
            tree.remove(item)
        };
        if removed {
            self.invalidate();
        }
        removed
    }

    /// Report that an item's bounds changed. May be called from any thread.
    ///
    /// The change is queued and then applied under the structural lock
    /// together with any other pending changes.
    pub fn notify_bounds_changed(&self, item: ItemRef) {
        // The receiver lives in `self`, so the channel cannot be disconnected
        let _ = self.bounds_tx.send(item);
        self.apply_pending_bounds_changes();
    }

    /// Apply every queued bounds change. Returns how many items moved.
    pub fn apply_pending_bounds_changes(&self) -> usize {
        let moved = {
            let mut tree = self.lock_tree();
            self.drain_bounds_changes(&mut tree)
        };
        if moved > 0 {
            self.invalidate();
        }
        moved
    }

    /// Collect the items visible in `view`.
    ///
    /// Returns `None` if `abort` fired during the traversal. A viewport crossing
    /// the antimeridian is queried as two regions and each item is returned at
    /// most once, with the union of the passes it was found visible in.
    pub fn query(&self, view: &ViewState, abort: &AbortToken) -> Option<Vec<Visible>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("index::query");

        if abort.is_aborted() {
            return None;
        }
        let frustum = view.scene.as_ref().map(Frustum::from_scene);
        let regions = view.viewport.query_regions();

        let mut tree = self.lock_tree();
        if self.drain_bounds_changes(&mut tree) > 0 {
            self.invalidate();
        }

        let mut result = Vec::new();
        for region in &regions {
            let query = CollectQuery {
                region: *region,
                resolution: view.draw_resolution,
                frustum: frustum.as_ref(),
                altitude_fallback: self.config.altitude_fallback,
            };
            if !tree.collect(&query, abort, &mut result) {
                tracing::trace!("Query aborted");
                return None;
            }
        }
        drop(tree);

        if regions.len() > 1 {
            result = dedup_by_identity(result);
        }
        Some(result)
    }

    /// Visit every held item while holding the structural lock
    pub fn for_each_item(&self, f: impl FnMut(&ItemRef)) {
        self.lock_tree().for_each_item(f);
    }

    /// Run `f` against the tree while holding the structural lock
    pub fn inspect<R>(&self, f: impl FnOnce(&QuadTree) -> R) -> R {
        f(&self.lock_tree())
    }

    /// Detach every item. Returns the detached items.
    pub fn clear(&self) -> Vec<ItemRef> {
        let detached = {
            let mut tree = self.lock_tree();
            // Queued changes refer to items that are about to leave
            while self.bounds_rx.try_recv().is_ok() {}
            tree.clear()
        };
        tracing::debug!(count = detached.len(), "Cleared index");
        self.invalidate();
        detached
    }

    pub fn len(&self) -> usize {
        self.lock_tree().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, item: &dyn MapItem) -> bool {
        self.lock_tree().contains(item)
    }

    /// The node holding `item`, if held by this index
    pub fn node_of(&self, item: &dyn MapItem) -> Option<NodeId> {
        self.lock_tree().node_of(item)
    }

    fn lock_tree(&self) -> MutexGuard<'_, QuadTree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain_bounds_changes(&self, tree: &mut QuadTree) -> usize {
        let mut moved = 0;
        for item in self.bounds_rx.try_iter() {
            if tree.reinsert(&item) {
                moved += 1;
            }
        }
        moved
    }

    fn invalidate(&self) {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener();
        }
    }
}

/// Merge duplicate entries of the same item, keeping the first position
fn dedup_by_identity(items: Vec<Visible>) -> Vec<Visible> {
    let mut seen: HashMap<*const (), usize> = HashMap::with_capacity(items.len());
    let mut out: Vec<Visible> = Vec::with_capacity(items.len());
    for visible in items {
        let key = Arc::as_ptr(&visible.item) as *const ();
        match seen.get(&key) {
            Some(&at) => out[at].passes |= visible.passes,
            None => {
                seen.insert(key, out.len());
                out.push(visible);
            }
        }
    }
    out
}

impl Visible {
    /// Whether the item was found visible in `pass`
    #[inline]
    pub fn in_pass(&self, pass: RenderPass) -> bool {
        self.passes.intersects(pass)
    }
}
