//! Background construction of render lists
//!
//! [`AsyncRenderListBuilder`] owns one worker thread. The render thread calls
//! [`AsyncRenderListBuilder::draw`] every frame with the current view; when the
//! view or the index content changed, the worker queries the index, sorts and
//! batches the result, and publishes a new [`RenderList`]. Items that dropped
//! out of the published list are handed back to the render thread, which
//! releases them at the start of its next draw.
//!
//! Lock order: the index's structural lock may be held while taking the
//! builder state lock (invalidation), never the reverse. The worker releases
//! the state lock before querying.

use crate::config::IndexConfig;
use crate::index::{AbortSignal, SpatialIndex};
use crate::item::{DrawContext, ItemRef, RenderPass};
use crate::ordering::{self, SortOutcome};
use crate::render_list::{HitTestList, RenderList, item_key};
use crate::scene::ViewState;
use crate::{IndexError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How far the published content is from the requested view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    /// Updates are paused
    Suspended,
    /// The worker is building a list
    Resolving,
    /// The published list is out of date and no build is running
    Unresolved,
    /// The published list matches the requested view
    Resolved,
}

#[derive(Default)]
struct BuilderState {
    /// Most recent view requested by the render thread
    target: Option<ViewState>,
    /// Draw version of the view the published list was built for
    prepared_version: Option<u64>,
    /// Content changed since the last build
    invalid: bool,
    /// The worker is running a query
    servicing: bool,
    suspended: bool,
    shutdown: bool,
    published: Arc<RenderList>,
    /// Items to release on the render thread
    pending_release: Vec<ItemRef>,
}

impl std::fmt::Debug for BuilderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderState")
            .field("target_version", &self.target.as_ref().map(|t| t.draw_version))
            .field("prepared_version", &self.prepared_version)
            .field("invalid", &self.invalid)
            .field("servicing", &self.servicing)
            .field("suspended", &self.suspended)
            .field("shutdown", &self.shutdown)
            .field("published", &self.published.len())
            .field("pending_release", &self.pending_release.len())
            .finish()
    }
}

impl BuilderState {
    /// The published list no longer matches the target
    fn is_stale(&self) -> bool {
        match &self.target {
            Some(target) => self.invalid || self.prepared_version != Some(target.draw_version),
            None => false,
        }
    }

    fn needs_build(&self) -> bool {
        !self.suspended && self.is_stale()
    }
}

#[derive(Debug)]
struct Shared {
    index: Arc<SpatialIndex>,
    config: IndexConfig,
    state: Mutex<BuilderState>,
    /// Wakes the worker
    wake: Condvar,
    /// Signalled after each publish
    published: Condvar,
    abort: AbortSignal,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BuilderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate(&self) {
        let mut state = self.lock();
        state.invalid = true;
        if !state.servicing && state.needs_build() {
            self.wake.notify_one();
        }
    }
}

/// Builds render lists for an index on a dedicated worker thread
#[derive(Debug)]
pub struct AsyncRenderListBuilder {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl AsyncRenderListBuilder {
    /// Start the worker and subscribe to content changes of `index`
    pub fn spawn(index: Arc<SpatialIndex>, config: IndexConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            index: Arc::clone(&index),
            config,
            state: Mutex::new(BuilderState::default()),
            wake: Condvar::new(),
            published: Condvar::new(),
            abort: AbortSignal::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(shared.config.worker_thread_name.clone())
            .spawn(move || worker_loop(worker_shared))
            .map_err(IndexError::WorkerSpawn)?;

        let listener: Weak<Shared> = Arc::downgrade(&shared);
        index.set_invalidation_listener(Some(Arc::new(move || {
            if let Some(shared) = listener.upgrade() {
                shared.invalidate();
            }
        })));

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Draw the published list for `passes`. Render thread only.
    ///
    /// Records `view` as the build target, wakes the worker if the published
    /// list is stale, and releases items dropped by earlier builds.
    pub fn draw(&self, ctx: &mut dyn DrawContext, passes: RenderPass, view: &ViewState) -> Result<()> {
        let (list, releases) = {
            let mut state = self.shared.lock();
            if state.shutdown {
                return Err(IndexError::Released);
            }
            let moved = state
                .target
                .as_ref()
                .is_none_or(|t| t.draw_version != view.draw_version);
            if state.invalid || moved {
                if moved && state.servicing {
                    // The running query is for an outdated view
                    self.shared.abort.abort();
                }
                state.target = Some(view.clone());
            }
            if !state.servicing && state.needs_build() {
                self.shared.wake.notify_one();
            }
            (
                Arc::clone(&state.published),
                std::mem::take(&mut state.pending_release),
            )
        };

        if !releases.is_empty() {
            tracing::trace!(count = releases.len(), "Releasing items no longer visible");
            releases.iter().for_each(|item| item.release());
        }
        list.draw(ctx, passes);
        Ok(())
    }

    /// Force a rebuild even if the view does not change
    pub fn invalidate(&self) {
        self.shared.invalidate();
    }

    /// Stop building new lists; the published list keeps being drawn
    pub fn suspend(&self) {
        let mut state = self.shared.lock();
        if !state.suspended {
            tracing::debug!("Render-list updates suspended");
            state.suspended = true;
        }
    }

    pub fn resume(&self) {
        let mut state = self.shared.lock();
        if state.suspended {
            tracing::debug!("Render-list updates resumed");
            state.suspended = false;
            self.shared.wake.notify_one();
        }
    }

    pub fn state(&self) -> ResolutionState {
        let state = self.shared.lock();
        if state.suspended {
            ResolutionState::Suspended
        } else if state.servicing {
            ResolutionState::Resolving
        } else if state.target.is_none() || state.is_stale() {
            ResolutionState::Unresolved
        } else {
            ResolutionState::Resolved
        }
    }

    /// The most recently published list
    pub fn published(&self) -> Arc<RenderList> {
        Arc::clone(&self.shared.lock().published)
    }

    /// Hit-test view of the most recently published list
    pub fn hit_test_list(&self) -> HitTestList {
        HitTestList::new(self.published())
    }

    /// Block until a list for `draw_version` or later is published.
    ///
    /// Returns false on timeout or shutdown.
    pub fn wait_for_version(&self, draw_version: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            let resolved = state
                .prepared_version
                .is_some_and(|v| v >= draw_version)
                && !state.invalid
                && !state.servicing;
            if resolved {
                return true;
            }
            let now = Instant::now();
            if state.shutdown || now >= deadline {
                return false;
            }
            state = self
                .shared
                .published
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Stop the worker and release everything retained. Render thread only.
    pub fn release(&self) {
        self.stop_worker();

        let (published, pending) = {
            let mut state = self.shared.lock();
            state.target = None;
            state.prepared_version = None;
            (
                std::mem::take(&mut state.published),
                std::mem::take(&mut state.pending_release),
            )
        };
        tracing::debug!(
            retained = published.len(),
            pending = pending.len(),
            "Releasing render list"
        );
        published.release_all();
        pending.iter().for_each(|item| item.release());
        self.shared.index.set_invalidation_listener(None);
    }

    pub fn is_released(&self) -> bool {
        self.shared.lock().shutdown
    }

    fn stop_worker(&self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.abort.abort();
            self.shared.wake.notify_all();
            self.shared.published.notify_all();
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::error!("Render-list worker panicked");
        }
    }
}

impl Drop for AsyncRenderListBuilder {
    /// Stops the worker. Item release is left to [`AsyncRenderListBuilder::release`],
    /// which must run on the render thread.
    fn drop(&mut self) {
        self.stop_worker();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    #[cfg(feature = "profiling")]
    profiling::register_thread!("render-list worker");

    tracing::debug!("Render-list worker started");
    let mut reentry_sleep = Duration::ZERO;
    loop {
        if !reentry_sleep.is_zero() {
            thread::sleep(reentry_sleep);
        }

        let (view, token) = {
            let mut state = shared.lock();
            if state.shutdown {
                break;
            }
            if !state.needs_build() {
                state = shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                // Let a burst of view changes settle before capturing the target
                reentry_sleep = if state.shutdown {
                    Duration::ZERO
                } else {
                    shared.config.query_state_capture_delay
                };
                continue;
            }
            reentry_sleep = Duration::ZERO;

            let Some(view) = state.target.clone() else {
                continue;
            };
            state.invalid = false;
            state.servicing = true;
            (view, shared.abort.token())
        };

        let built = build_list(&shared, &view, &token);

        let mut state = shared.lock();
        state.servicing = false;
        if let Some(list) = built
            && !state.shutdown
        {
            publish(&mut state, list);
            state.prepared_version = Some(view.draw_version);
        }
        shared.published.notify_all();
    }
    tracing::debug!("Render-list worker stopped");
}

fn build_list(
    shared: &Shared,
    view: &ViewState,
    token: &crate::index::AbortToken,
) -> Option<RenderList> {
    #[cfg(feature = "profiling")]
    profiling::scope!("builder::build_list");

    let mut visible = shared.index.query(view, token)?;
    if token.is_aborted() {
        return None;
    }
    if ordering::sort_for_view(&mut visible, view, &shared.config) == SortOutcome::Unsorted {
        tracing::debug!(version = view.draw_version, "Publishing unsorted list");
    }
    let list = RenderList::build(&visible, view.draw_version);
    tracing::trace!(
        version = view.draw_version,
        items = list.len(),
        surface = list.drawables(RenderPass::SURFACE).len(),
        sprites = list.drawables(RenderPass::SPRITES).len(),
        "Built render list"
    );
    Some(list)
}

/// Swap in a new list, queueing items that left it for release
fn publish(state: &mut BuilderState, list: RenderList) {
    let keep: HashSet<usize> = list.retained().iter().map(item_key).collect();
    // Items that came back before the render thread released them stay alive
    state
        .pending_release
        .retain(|item| !keep.contains(&item_key(item)));
    let dropped: Vec<ItemRef> = state
        .published
        .retained()
        .iter()
        .filter(|item| !keep.contains(&item_key(item)))
        .cloned()
        .collect();
    state.pending_release.extend(dropped);
    state.published = Arc::new(list);
}
