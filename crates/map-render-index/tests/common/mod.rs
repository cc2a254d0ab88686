//! Shared item type for the integration tests

#![allow(dead_code)]

use map_render_index::{
    Batchable, DrawContext, GeoBounds, ItemId, ItemRef, MapItem, NodeSlot, RenderPass, Subject,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A point-like item whose bounds can be moved from any thread
pub struct Pin {
    pub id: u64,
    pub bounds: Mutex<GeoBounds>,
    pub pass: RenderPass,
    pub batchable: bool,
    pub slot: NodeSlot,
    pub draws: AtomicUsize,
    pub releases: AtomicUsize,
}

impl Pin {
    pub fn new(id: u64, bounds: GeoBounds) -> Arc<Self> {
        Self::with(id, bounds, RenderPass::SPRITES, false)
    }

    pub fn with(id: u64, bounds: GeoBounds, pass: RenderPass, batchable: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            bounds: Mutex::new(bounds),
            pass,
            batchable,
            slot: NodeSlot::new(),
            draws: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn move_to(&self, bounds: GeoBounds) {
        *self.bounds.lock().unwrap() = bounds;
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::SeqCst)
    }
}

impl MapItem for Pin {
    fn id(&self) -> ItemId {
        ItemId(self.id)
    }
    fn subject(&self) -> Subject {
        Subject::new(self.id as f64)
    }
    fn bounds(&self) -> GeoBounds {
        *self.bounds.lock().unwrap()
    }
    fn min_draw_resolution(&self) -> f64 {
        f64::MAX
    }
    fn render_pass(&self) -> RenderPass {
        self.pass
    }
    fn draw(&self, _ctx: &mut dyn DrawContext, _pass: RenderPass) {
        self.draws.fetch_add(1, Ordering::SeqCst);
    }
    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
    fn as_batchable(&self) -> Option<&dyn Batchable> {
        self.batchable.then_some(self as &dyn Batchable)
    }
    fn node_slot(&self) -> &NodeSlot {
        &self.slot
    }
    fn kind(&self) -> &str {
        "pin"
    }
}

impl Batchable for Pin {
    fn batch(&self, _ctx: &mut dyn DrawContext, _pass: RenderPass) {
        self.draws.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts batch brackets
#[derive(Debug, Default)]
pub struct CountingContext {
    pub batches: usize,
    pub open: bool,
}

impl DrawContext for CountingContext {
    fn batch_begin(&mut self) {
        assert!(!self.open, "nested batch");
        self.open = true;
        self.batches += 1;
    }
    fn batch_end(&mut self) {
        assert!(self.open, "unbalanced batch end");
        self.open = false;
    }
}

pub fn as_refs(pins: &[Arc<Pin>]) -> Vec<ItemRef> {
    pins.iter().map(|p| Arc::clone(p) as ItemRef).collect()
}

pub fn sorted_ids(items: impl IntoIterator<Item = u64>) -> Vec<u64> {
    let mut ids: Vec<u64> = items.into_iter().collect();
    ids.sort_unstable();
    ids
}
