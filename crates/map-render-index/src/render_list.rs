//! Published per-frame draw lists and their hit-test view

use crate::batch::{self, Drawable};
use crate::item::{DrawContext, ItemRef, RenderPass};
use crate::quadtree::Visible;
use std::collections::HashSet;
use std::sync::Arc;

/// Identity key of an item, stable while any reference to it is alive
#[inline]
pub(crate) fn item_key(item: &ItemRef) -> usize {
    Arc::as_ptr(item) as *const () as usize
}

/// One frame's ordered, batched content. Immutable once built.
#[derive(Clone, Default)]
pub struct RenderList {
    surface: Vec<Drawable>,
    sprites: Vec<Drawable>,
    /// Every distinct item referenced by either pass
    retained: Vec<ItemRef>,
    /// Draw version of the view state this list was built for
    version: u64,
}

impl RenderList {
    /// Build the list from query results already in draw order
    pub fn build(ordered: &[Visible], version: u64) -> Self {
        let mut seen = HashSet::with_capacity(ordered.len());
        let retained = ordered
            .iter()
            .filter(|v| seen.insert(item_key(&v.item)))
            .map(|v| Arc::clone(&v.item))
            .collect();
        Self {
            surface: batch::compose(ordered, RenderPass::SURFACE),
            sprites: batch::compose(ordered, RenderPass::SPRITES),
            retained,
            version,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Draw entries of a single pass
    pub fn drawables(&self, pass: RenderPass) -> &[Drawable] {
        if pass == RenderPass::SPRITES {
            &self.sprites
        } else if pass == RenderPass::SURFACE {
            &self.surface
        } else {
            &[]
        }
    }

    /// Draw the requested passes, surface first
    pub fn draw(&self, ctx: &mut dyn DrawContext, passes: RenderPass) {
        #[cfg(feature = "profiling")]
        profiling::scope!("render_list::draw");

        for pass in [RenderPass::SURFACE, RenderPass::SPRITES] {
            if passes.contains(pass) {
                for drawable in self.drawables(pass) {
                    drawable.draw(ctx, pass);
                }
            }
        }
    }

    /// Distinct items referenced by this list
    pub fn retained(&self) -> &[ItemRef] {
        &self.retained
    }

    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    /// Release every retained item once
    pub fn release_all(&self) {
        self.retained.iter().for_each(|item| item.release());
    }
}

impl std::fmt::Debug for RenderList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderList")
            .field("version", &self.version)
            .field("surface", &self.surface)
            .field("sprites", &self.sprites)
            .field("retained", &self.retained.len())
            .finish()
    }
}

/// Hit-test view of a published list: topmost content first
#[derive(Debug, Clone, Default)]
pub struct HitTestList {
    list: Arc<RenderList>,
}

impl HitTestList {
    pub fn new(list: Arc<RenderList>) -> Self {
        Self { list }
    }

    /// Entries in reverse draw order: sprites (last drawn) then surface
    pub fn drawables(&self) -> impl Iterator<Item = &Drawable> {
        self.list
            .sprites
            .iter()
            .rev()
            .chain(self.list.surface.iter().rev())
    }

    /// Items in reverse draw order, batches flattened, each item once
    pub fn items(&self) -> Vec<ItemRef> {
        let mut seen = HashSet::new();
        self.drawables()
            .flat_map(|d| d.items().iter().rev())
            .filter(|item| seen.insert(item_key(item)))
            .cloned()
            .collect()
    }

    pub fn version(&self) -> u64 {
        self.list.version
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}
