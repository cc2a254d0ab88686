//! Application-facing renderer combining the index, the worker and the registry

use crate::builder::{AsyncRenderListBuilder, ResolutionState};
use crate::config::IndexConfig;
use crate::index::SpatialIndex;
use crate::item::{Control, DrawContext, ItemRef, MapItem, RenderPass};
use crate::registry::{ItemKind, ItemRegistry};
use crate::render_list::HitTestList;
use crate::scene::ViewState;
use crate::{IndexError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Renders the items of one [`SpatialIndex`] through a background-built list
///
/// `D` is the application object type the [`ItemRegistry`] builds items from.
#[derive(Debug)]
pub struct QuadtreeRenderer<D> {
    index: Arc<SpatialIndex>,
    builder: AsyncRenderListBuilder,
    registry: Arc<ItemRegistry<D>>,
    show_indicator_lines: AtomicBool,
    clamp_to_ground_at_nadir: AtomicBool,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<D> QuadtreeRenderer<D> {
    /// Validate `config`, create an empty index and start its worker
    pub fn new(config: IndexConfig, registry: Arc<ItemRegistry<D>>) -> Result<Self> {
        config.validate()?;
        let index = Arc::new(SpatialIndex::new(config.clone()));
        let builder = AsyncRenderListBuilder::spawn(Arc::clone(&index), config)?;
        tracing::debug!(?registry, "Quadtree renderer created");
        Ok(Self {
            index,
            builder,
            registry,
            show_indicator_lines: AtomicBool::new(false),
            clamp_to_ground_at_nadir: AtomicBool::new(false),
        })
    }

    pub fn index(&self) -> &Arc<SpatialIndex> {
        &self.index
    }

    pub fn registry(&self) -> &ItemRegistry<D> {
        &self.registry
    }

    /// Build an item for an application object and insert it.
    ///
    /// Returns `Ok(None)` if the factory declined the object.
    pub fn add_subject(&self, kind: ItemKind, descriptor: &D) -> Result<Option<ItemRef>> {
        if self.builder.is_released() {
            return Err(IndexError::Released);
        }
        let Some(item) = self.registry.create(kind, descriptor)? else {
            tracing::trace!(%kind, "Factory declined subject");
            return Ok(None);
        };
        self.insert(Arc::clone(&item));
        Ok(Some(item))
    }

    /// Insert an item, applying the current global toggles it supports
    pub fn insert(&self, item: ItemRef) -> bool {
        self.apply_controls(item.as_ref());
        self.index.insert(item)
    }

    /// Insert many items at once
    pub fn insert_all(&self, items: Vec<ItemRef>) -> usize {
        items
            .iter()
            .for_each(|item| self.apply_controls(item.as_ref()));
        self.index.insert_all(items)
    }

    pub fn remove(&self, item: &dyn MapItem) -> bool {
        self.index.remove(item)
    }

    /// Report a geometry change of `item`; may be called from any thread
    pub fn notify_bounds_changed(&self, item: ItemRef) {
        self.index.notify_bounds_changed(item);
    }

    /// Draw the current list for `passes`. Render thread only.
    pub fn draw(&self, ctx: &mut dyn DrawContext, passes: RenderPass, view: &ViewState) -> Result<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("renderer::draw");

        self.builder.draw(ctx, passes, view)
    }

    /// Stop the worker and release all retained items. Render thread only.
    pub fn release(&self) {
        self.builder.release();
    }

    /// Current list in hit-test order
    pub fn hit_test_list(&self) -> HitTestList {
        self.builder.hit_test_list()
    }

    pub fn show_indicator_lines(&self) -> bool {
        self.show_indicator_lines.load(Ordering::Acquire)
    }

    pub fn set_show_indicator_lines(&self, enabled: bool) {
        if self.show_indicator_lines.swap(enabled, Ordering::AcqRel) != enabled {
            self.broadcast(Control::ShowIndicatorLines(enabled));
        }
    }

    pub fn clamp_to_ground_at_nadir(&self) -> bool {
        self.clamp_to_ground_at_nadir.load(Ordering::Acquire)
    }

    pub fn set_clamp_to_ground_at_nadir(&self, enabled: bool) {
        if self.clamp_to_ground_at_nadir.swap(enabled, Ordering::AcqRel) != enabled {
            self.broadcast(Control::ClampToGroundAtNadir(enabled));
        }
    }

    pub fn invalidate(&self) {
        self.builder.invalidate();
    }

    pub fn suspend(&self) {
        self.builder.suspend();
    }

    pub fn resume(&self) {
        self.builder.resume();
    }

    pub fn state(&self) -> ResolutionState {
        self.builder.state()
    }

    pub fn builder(&self) -> &AsyncRenderListBuilder {
        &self.builder
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Send a control to every held item that supports it
    fn broadcast(&self, control: Control) {
        // Snapshot first: items may report bounds changes from apply_control
        let mut items = Vec::new();
        self.index.for_each_item(|item| {
            if item.capabilities().contains(control.capability()) {
                items.push(Arc::clone(item));
            }
        });
        tracing::debug!(?control, items = items.len(), "Applying control");
        items.iter().for_each(|item| item.apply_control(control));
        self.builder.invalidate();
    }

    fn apply_controls(&self, item: &dyn MapItem) {
        let caps = item.capabilities();
        for control in [
            Control::ShowIndicatorLines(self.show_indicator_lines()),
            Control::ClampToGroundAtNadir(self.clamp_to_ground_at_nadir()),
        ] {
            if caps.contains(control.capability()) {
                item.apply_control(control);
            }
        }
    }
}
