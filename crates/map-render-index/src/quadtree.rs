//! Geographic quadtree over map items
//!
//! Nodes live in an arena and are addressed by generational [`NodeId`]s, so an
//! item's back-reference is a plain handle rather than a pointer into the tree.
//! A freed slot is recycled with a bumped generation, which lets [`QuadTree`]
//! detect stale references left on items.
//!
//! The tree itself is not synchronized; [`crate::SpatialIndex`] wraps it in the
//! structural lock.

use crate::bounds::{AltitudeBand, GeoBounds};
use crate::frustum::Frustum;
use crate::index::AbortToken;
use crate::item::{self, ItemRef, MapItem, NodeRef, RenderPass};
use std::sync::Arc;

/// Handle to a node in a [`QuadTree`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// An item selected by a query, with the passes it is visible in
#[derive(Clone)]
pub struct Visible {
    pub item: ItemRef,
    pub passes: RenderPass,
}

impl std::fmt::Debug for Visible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Visible")
            .field("item", &self.item.id())
            .field("passes", &self.passes)
            .finish()
    }
}

/// Parameters of one traversal
#[derive(Debug, Clone, Copy)]
pub struct CollectQuery<'a> {
    /// Geographic region to collect
    pub region: GeoBounds,
    /// Current map resolution
    pub resolution: f64,
    /// View volume for the sprite pass; `None` for flat views
    pub frustum: Option<&'a Frustum>,
    /// Altitude envelope for items without altitude limits
    pub altitude_fallback: AltitudeBand,
}

impl CollectQuery<'_> {
    /// Passes in which `item` passes the resolution gate and its spatial test
    fn visible_passes(&self, item: &dyn MapItem) -> RenderPass {
        if self.resolution > item.min_draw_resolution() {
            return RenderPass::empty();
        }
        let bounds = item.bounds();
        let wanted = item.render_pass();
        let mut passes = RenderPass::empty();
        if wanted.contains(RenderPass::SURFACE) && self.region.intersects(&bounds) {
            passes |= RenderPass::SURFACE;
        }
        if wanted.contains(RenderPass::SPRITES) {
            let hit = match self.frustum {
                Some(frustum) => frustum.intersects_geo_bounds(&bounds, self.altitude_fallback),
                None => self.region.intersects(&bounds),
            };
            if hit {
                passes |= RenderPass::SPRITES;
            }
        }
        passes
    }

    /// Whether any content of a cell may be visible
    fn cell_visible(&self, cell: &GeoBounds) -> bool {
        self.region.intersects(cell)
            || self.frustum.is_some_and(|frustum| {
                frustum.intersects_geo_bounds(cell, self.altitude_fallback)
            })
    }
}

/// One cell of the partition
struct QuadTreeNode {
    bounds: GeoBounds,
    depth: u32,
    parent: Option<NodeId>,
    /// Quadrants in NW, NE, SW, SE order
    children: [Option<NodeId>; 4],
    /// Items whose bounds fit this cell but no single quadrant of it
    items: Vec<ItemRef>,
}

impl QuadTreeNode {
    fn new(bounds: GeoBounds, depth: u32, parent: Option<NodeId>) -> Self {
        Self {
            bounds,
            depth,
            parent,
            children: [None; 4],
            items: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty() && self.children.iter().all(Option::is_none)
    }

    fn position_of(&self, item: &dyn MapItem) -> Option<usize> {
        self.items.iter().position(|held| same_item(held.as_ref(), item))
    }
}

impl std::fmt::Debug for QuadTreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<_> = self.items.iter().map(|item| item.id()).collect();
        f.debug_struct("QuadTreeNode")
            .field("bounds", &self.bounds)
            .field("depth", &self.depth)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("items", &ids)
            .finish()
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<QuadTreeNode>,
}

/// Arena-backed quadtree rooted at the whole globe
#[derive(Debug)]
pub struct QuadTree {
    tree_id: u64,
    max_depth: u32,
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    len: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl QuadTree {
    /// Create an empty tree. `tree_id` tags the back-references this tree
    /// writes so references from other trees are rejected.
    pub fn new(tree_id: u64, max_depth: u32) -> Self {
        let mut tree = Self {
            tree_id,
            max_depth,
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId::new(0, 0),
            len: 0,
        };
        tree.root = tree.alloc(QuadTreeNode::new(GeoBounds::world(), 0, None));
        tree
    }

    pub fn tree_id(&self) -> u64 {
        self.tree_id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of items held
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of live nodes, root included
    pub fn node_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether `id` designates a live node of this tree
    pub fn is_live(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node_bounds(&self, id: NodeId) -> Option<GeoBounds> {
        self.node(id).map(|n| n.bounds)
    }

    pub fn node_depth(&self, id: NodeId) -> Option<u32> {
        self.node(id).map(|n| n.depth)
    }

    pub fn children(&self, id: NodeId) -> [Option<NodeId>; 4] {
        self.node(id).map(|n| n.children).unwrap_or([None; 4])
    }

    /// The node currently holding `item`, if it is held by this tree
    pub fn node_of(&self, item: &dyn MapItem) -> Option<NodeId> {
        let NodeRef { tree, node } = item.node_slot().get()?;
        (tree == self.tree_id && self.is_live(node)).then_some(node)
    }

    pub fn contains(&self, item: &dyn MapItem) -> bool {
        self.node_of(item)
            .and_then(|id| self.node(id))
            .is_some_and(|n| n.position_of(item).is_some())
    }

    /// Insert an item at the shallowest node that fully contains its current bounds
    pub fn insert(&mut self, item: ItemRef) -> bool {
        let bounds = item.bounds();
        self.insert_with_bounds(item, bounds)
    }

    /// Insert using bounds computed by the caller
    pub fn insert_with_bounds(&mut self, item: ItemRef, bounds: GeoBounds) -> bool {
        if let Some(existing) = item.node_slot().get() {
            tracing::warn!(
                existing_tree = existing.tree,
                "Ignoring insert of {}: already held by an index",
                item::describe(item.as_ref())
            );
            return false;
        }

        let target = self.descend_for_insert(&bounds);
        item.node_slot().set(Some(NodeRef {
            tree: self.tree_id,
            node: target,
        }));
        if let Some(node) = self.node_mut(target) {
            node.items.push(item);
        }
        self.len += 1;
        true
    }

    /// Remove an item, pruning nodes left empty
    pub fn remove(&mut self, item: &dyn MapItem) -> bool {
        let Some(NodeRef { tree, node }) = item.node_slot().get() else {
            tracing::warn!(
                "Ignoring remove of {}: not held by any index",
                item::describe(item)
            );
            return false;
        };
        if tree != self.tree_id {
            tracing::warn!(
                owner_tree = tree,
                this_tree = self.tree_id,
                "Ignoring remove of {}: held by another index",
                item::describe(item)
            );
            return false;
        }

        let found = match self.node(node).and_then(|n| n.position_of(item)) {
            Some(pos) => Some((node, pos)),
            None => {
                tracing::debug!(
                    "Back-reference of {} is stale, searching by bounds",
                    item::describe(item)
                );
                self.locate_by_bounds(item)
            }
        };
        let Some((holder, pos)) = found else {
            tracing::warn!(
                "Ignoring remove of {}: not found in this index",
                item::describe(item)
            );
            return false;
        };

        if let Some(n) = self.node_mut(holder) {
            n.items.swap_remove(pos);
        }
        item.node_slot().set(None);
        self.len -= 1;
        self.prune(holder);
        true
    }

    /// Move an item to the node matching its current bounds.
    ///
    /// Remove and insert happen under one `&mut self` borrow, so a caller
    /// holding the structural lock sees the item at exactly one place.
    pub fn reinsert(&mut self, item: &ItemRef) -> bool {
        if self.node_of(item.as_ref()).is_none() {
            tracing::trace!(
                "Skipping bounds update of {}: not held by this index",
                item::describe(item.as_ref())
            );
            return false;
        }
        if !self.remove(item.as_ref()) {
            return false;
        }
        self.insert(Arc::clone(item))
    }

    /// Collect the items visible for `query` into `out`.
    ///
    /// Returns false if the traversal stopped early because `abort` fired;
    /// `out` then holds a partial result that must be discarded.
    pub fn collect(
        &self,
        query: &CollectQuery<'_>,
        abort: &AbortToken,
        out: &mut Vec<Visible>,
    ) -> bool {
        self.collect_node(self.root, query, abort, out)
    }

    fn collect_node(
        &self,
        id: NodeId,
        query: &CollectQuery<'_>,
        abort: &AbortToken,
        out: &mut Vec<Visible>,
    ) -> bool {
        let Some(node) = self.node(id) else {
            return true;
        };
        for held in &node.items {
            if abort.is_aborted() {
                return false;
            }
            let passes = query.visible_passes(held.as_ref());
            if !passes.is_empty() {
                out.push(Visible {
                    item: Arc::clone(held),
                    passes,
                });
            }
        }

        for child in node.children.iter().flatten() {
            if abort.is_aborted() {
                return false;
            }
            let Some(cell) = self.node_bounds(*child) else {
                continue;
            };
            let completed = if query.region.contains(&cell) {
                self.collect_all(*child, query.resolution, abort, out)
            } else if query.cell_visible(&cell) {
                self.collect_node(*child, query, abort, out)
            } else {
                true
            };
            if !completed {
                return false;
            }
        }
        true
    }

    /// Collect a whole subtree known to lie inside the query region; only the
    /// resolution gate is applied
    fn collect_all(
        &self,
        id: NodeId,
        resolution: f64,
        abort: &AbortToken,
        out: &mut Vec<Visible>,
    ) -> bool {
        let Some(node) = self.node(id) else {
            return true;
        };
        for held in &node.items {
            if abort.is_aborted() {
                return false;
            }
            if resolution <= held.min_draw_resolution() {
                out.push(Visible {
                    item: Arc::clone(held),
                    passes: held.render_pass(),
                });
            }
        }
        for child in node.children.iter().flatten() {
            if abort.is_aborted() || !self.collect_all(*child, resolution, abort, out) {
                return false;
            }
        }
        true
    }

    /// Visit every held item, depth first
    pub fn for_each_item(&self, mut f: impl FnMut(&ItemRef)) {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node(id) {
                node.items.iter().for_each(&mut f);
                stack.extend(node.children.iter().flatten());
            }
        }
    }

    /// Detach every item and drop all nodes except a fresh root
    pub fn clear(&mut self) -> Vec<ItemRef> {
        let mut detached = Vec::with_capacity(self.len);
        for slot in &mut self.slots {
            if let Some(node) = slot.node.take() {
                for held in node.items {
                    held.node_slot().set(None);
                    detached.push(held);
                }
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.free = (0..self.slots.len() as u32).rev().collect();
        self.len = 0;
        self.root = self.alloc(QuadTreeNode::new(GeoBounds::world(), 0, None));
        detached
    }

    fn descend_for_insert(&mut self, bounds: &GeoBounds) -> NodeId {
        let mut current = self.root;
        loop {
            let Some(node) = self.node(current) else {
                return self.root;
            };
            if node.depth >= self.max_depth {
                return current;
            }

            // Prefer an existing child, then lazily create one
            let existing = node.children.iter().flatten().copied().find(|child| {
                self.node_bounds(*child)
                    .is_some_and(|cell| cell.contains(bounds))
            });
            if let Some(child) = existing {
                current = child;
                continue;
            }

            let (cell_bounds, depth, children) = (node.bounds, node.depth, node.children);
            let free_quadrant = (0..4).find(|&q| {
                children[q].is_none() && cell_bounds.quadrant(q).contains(bounds)
            });
            match free_quadrant {
                Some(q) => {
                    let child = self.alloc(QuadTreeNode::new(
                        cell_bounds.quadrant(q),
                        depth + 1,
                        Some(current),
                    ));
                    if let Some(parent) = self.node_mut(current) {
                        parent.children[q] = Some(child);
                    }
                    current = child;
                }
                None => return current,
            }
        }
    }

    /// Walk from the root along the cells containing the item's bounds
    fn locate_by_bounds(&self, item: &dyn MapItem) -> Option<(NodeId, usize)> {
        let bounds = item.bounds();
        let mut current = Some(self.root);
        while let Some(id) = current {
            let node = self.node(id)?;
            if let Some(pos) = node.position_of(item) {
                return Some((id, pos));
            }
            current = node.children.iter().flatten().copied().find(|child| {
                self.node_bounds(*child)
                    .is_some_and(|cell| cell.contains(&bounds))
            });
        }
        None
    }

    /// Detach empty nodes from `id` upward, never removing the root
    fn prune(&mut self, mut id: NodeId) {
        while id != self.root {
            let Some(node) = self.node(id) else {
                return;
            };
            if !node.is_empty() {
                return;
            }
            let Some(parent) = node.parent else {
                return;
            };
            self.release_node(id);
            if let Some(p) = self.node_mut(parent) {
                for child in p.children.iter_mut() {
                    if *child == Some(id) {
                        *child = None;
                    }
                }
            }
            id = parent;
        }
    }

    fn alloc(&mut self, node: QuadTreeNode) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId::new(index, slot.generation)
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId::new(self.slots.len() as u32 - 1, 0)
            }
        }
    }

    fn release_node(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize)
            && slot.generation == id.generation
            && slot.node.take().is_some()
        {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
        }
    }

    fn node(&self, id: NodeId) -> Option<&QuadTreeNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut QuadTreeNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }
}

/// Identity comparison of two items, ignoring vtable differences
#[inline]
pub(crate) fn same_item(a: &dyn MapItem, b: &dyn MapItem) -> bool {
    std::ptr::eq(
        a as *const dyn MapItem as *const (),
        b as *const dyn MapItem as *const (),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::item::{DrawContext, ItemId, NodeSlot, Subject};
    use std::sync::Mutex;

    /// Minimal item with mutable bounds
    pub(crate) struct TestItem {
        pub id: u64,
        pub bounds: Mutex<GeoBounds>,
        pub min_resolution: f64,
        pub pass: RenderPass,
        pub slot: NodeSlot,
    }

    impl TestItem {
        pub(crate) fn new(id: u64, bounds: GeoBounds) -> Arc<Self> {
            Self::with(id, bounds, f64::MAX, RenderPass::SURFACE)
        }

        pub(crate) fn with(
            id: u64,
            bounds: GeoBounds,
            min_resolution: f64,
            pass: RenderPass,
        ) -> Arc<Self> {
            Arc::new(Self {
                id,
                bounds: Mutex::new(bounds),
                min_resolution,
                pass,
                slot: NodeSlot::new(),
            })
        }

        pub(crate) fn set_bounds(&self, bounds: GeoBounds) {
            *self.bounds.lock().unwrap() = bounds;
        }
    }

    impl MapItem for TestItem {
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
            self.min_resolution
        }
        fn render_pass(&self) -> RenderPass {
            self.pass
        }
        fn draw(&self, _ctx: &mut dyn DrawContext, _pass: RenderPass) {}
        fn release(&self) {}
        fn node_slot(&self) -> &NodeSlot {
            &self.slot
        }
    }

    fn query(region: GeoBounds, resolution: f64) -> CollectQuery<'static> {
        CollectQuery {
            region,
            resolution,
            frustum: None,
            altitude_fallback: AltitudeBand::default(),
        }
    }

    fn collect_ids(tree: &QuadTree, q: &CollectQuery<'_>) -> Vec<u64> {
        let mut out = Vec::new();
        assert!(tree.collect(q, &AbortToken::never(), &mut out));
        let mut ids: Vec<u64> = out.iter().map(|v| v.item.id().0).collect();
        ids.sort_unstable();
        ids
    }

    /// Asserts the item sits at a node containing it and that no quadrant of
    /// that node (below max depth) would also contain it
    fn assert_shallowest(tree: &QuadTree, item: &dyn MapItem) {
        let id = tree.node_of(item).expect("item should be held");
        let cell = tree.node_bounds(id).unwrap();
        let bounds = item.bounds();
        assert!(cell.contains(&bounds));
        if tree.node_depth(id).unwrap() < tree.max_depth {
            for q in 0..4 {
                assert!(
                    !cell.quadrant(q).contains(&bounds),
                    "item {} fits quadrant {q} of its node",
                    item.id()
                );
            }
        }
    }

    #[test]
    fn test_insert_stores_at_shallowest_containing_node() {
        let mut tree = QuadTree::new(1, 18);
        let small = TestItem::new(1, GeoBounds::new(45.1, 10.1, 45.0, 10.2));
        let spanning = TestItem::new(2, GeoBounds::new(10.0, -10.0, -10.0, 10.0));
        let point = TestItem::new(3, GeoBounds::point(-33.9, 151.2));

        assert!(tree.insert(small.clone()));
        assert!(tree.insert(spanning.clone()));
        assert!(tree.insert(point.clone()));

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.node_of(spanning.as_ref()), Some(tree.root()));
        assert_shallowest(&tree, small.as_ref());
        assert_shallowest(&tree, spanning.as_ref());
        // Points descend to max depth
        let leaf = tree.node_of(point.as_ref()).unwrap();
        assert_eq!(tree.node_depth(leaf), Some(18));
        assert!(tree.contains(point.as_ref()));
    }

    #[test]
    fn test_double_insert_is_rejected() {
        let mut tree = QuadTree::new(1, 18);
        let item = TestItem::new(1, GeoBounds::point(1.0, 1.0));
        assert!(tree.insert(item.clone()));
        let nodes = tree.node_count();
        assert!(!tree.insert(item.clone()));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.node_count(), nodes);
    }

    #[test]
    fn test_remove_prunes_empty_chain() {
        let mut tree = QuadTree::new(1, 18);
        let item = TestItem::new(1, GeoBounds::point(12.0, 34.0));
        tree.insert(item.clone());
        let leaf = tree.node_of(item.as_ref()).unwrap();
        assert_eq!(tree.node_count(), 19);

        assert!(tree.remove(item.as_ref()));
        assert!(!item.slot.is_attached());
        assert!(!tree.is_live(leaf));
        assert_eq!(tree.node_count(), 1);
        assert!(tree.children(tree.root()).iter().all(Option::is_none));
    }

    #[test]
    fn test_prune_stops_at_shared_ancestor() {
        let mut tree = QuadTree::new(1, 18);
        let a = TestItem::new(1, GeoBounds::new(45.0, 10.0, 44.0, 11.0));
        let b = TestItem::new(2, GeoBounds::point(44.5, 10.5));
        tree.insert(a.clone());
        tree.insert(b.clone());
        let a_node = tree.node_of(a.as_ref()).unwrap();

        tree.remove(b.as_ref());
        assert!(tree.is_live(a_node));
        assert!(tree.children(a_node).iter().all(Option::is_none));
        assert_shallowest(&tree, a.as_ref());
    }

    #[test]
    fn test_remove_absent_item_is_noop() {
        let mut tree = QuadTree::new(1, 18);
        let held = TestItem::new(1, GeoBounds::point(1.0, 1.0));
        let stranger = TestItem::new(2, GeoBounds::point(1.0, 1.0));
        tree.insert(held.clone());
        let nodes = tree.node_count();

        assert!(!tree.remove(stranger.as_ref()));
        assert!(tree.remove(held.as_ref()));
        assert!(!tree.remove(held.as_ref()));
        assert_eq!(tree.len(), 0);
        assert!(tree.node_count() < nodes);
    }

    #[test]
    fn test_foreign_reference_is_rejected() {
        let mut a = QuadTree::new(1, 18);
        let mut b = QuadTree::new(2, 18);
        let item = TestItem::new(1, GeoBounds::point(1.0, 1.0));
        a.insert(item.clone());

        assert!(!b.remove(item.as_ref()));
        assert!(a.contains(item.as_ref()));
        assert!(!b.insert(item.clone()));
    }

    #[test]
    fn test_stale_generation_is_not_live() {
        let mut tree = QuadTree::new(1, 18);
        let a = TestItem::new(1, GeoBounds::point(10.0, 10.0));
        tree.insert(a.clone());
        let old = tree.node_of(a.as_ref()).unwrap();
        tree.remove(a.as_ref());

        // Recycles the freed slots
        let b = TestItem::new(2, GeoBounds::point(-10.0, -10.0));
        tree.insert(b.clone());
        assert!(!tree.is_live(old));
        assert_ne!(tree.node_of(b.as_ref()), Some(old));
    }

    #[test]
    fn test_reinsert_moves_item() {
        let mut tree = QuadTree::new(1, 18);
        let item = TestItem::new(1, GeoBounds::point(10.0, 10.0));
        tree.insert(item.clone());

        item.set_bounds(GeoBounds::point(-10.0, -10.0));
        let as_ref: ItemRef = item.clone();
        assert!(tree.reinsert(&as_ref));
        assert_eq!(tree.len(), 1);
        assert_shallowest(&tree, item.as_ref());

        let q = query(GeoBounds::new(20.0, 0.0, 0.0, 20.0), 0.0);
        assert!(collect_ids(&tree, &q).is_empty());
        let q = query(GeoBounds::new(0.0, -20.0, -20.0, 0.0), 0.0);
        assert_eq!(collect_ids(&tree, &q), vec![1]);
    }

    #[test]
    fn test_remove_with_stale_back_reference() {
        let mut tree = QuadTree::new(1, 18);
        let item = TestItem::new(1, GeoBounds::point(10.0, 10.0));
        tree.insert(item.clone());
        let root = tree.root();
        // Point the back-reference at the root; removal falls back to a bounds walk
        item.slot.set(Some(NodeRef {
            tree: 1,
            node: root,
        }));
        assert!(tree.remove(item.as_ref()));
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_whole_globe_and_quadrant_queries() {
        let mut tree = QuadTree::new(1, 18);
        let a_bounds = GeoBounds::new(45.0, 45.0, 30.0, 60.0);
        let a = TestItem::with(1, a_bounds, 0.0, RenderPass::SURFACE);
        let b = TestItem::with(
            2,
            GeoBounds::new(10.0, -30.0, -10.0, 30.0),
            0.0,
            RenderPass::SURFACE,
        );
        let c = TestItem::with(3, a_bounds, 0.0, RenderPass::SURFACE);
        for item in [a.clone(), b.clone(), c.clone()] {
            tree.insert(item);
        }
        assert_eq!(tree.node_of(b.as_ref()), Some(tree.root()));
        assert_eq!(tree.node_of(a.as_ref()), tree.node_of(c.as_ref()));

        assert_eq!(
            collect_ids(&tree, &query(GeoBounds::world(), 0.0)),
            vec![1, 2, 3]
        );
        let sw = GeoBounds::world().quadrant(2);
        assert_eq!(collect_ids(&tree, &query(sw, 0.0)), vec![2]);
    }

    #[test]
    fn test_resolution_gate() {
        let mut tree = QuadTree::new(1, 18);
        let d = TestItem::with(4, GeoBounds::point(1.0, 1.0), 5.0, RenderPass::SURFACE);
        tree.insert(d);
        let region = GeoBounds::new(2.0, 0.0, 0.0, 2.0);

        assert!(collect_ids(&tree, &query(region, 10.0)).is_empty());
        assert_eq!(collect_ids(&tree, &query(region, 1.0)), vec![4]);
        assert_eq!(collect_ids(&tree, &query(region, 5.0)), vec![4]);
        // Contained subtrees still apply the gate
        assert!(collect_ids(&tree, &query(GeoBounds::world(), 10.0)).is_empty());
    }

    #[test]
    fn test_passes_are_reported_per_item() {
        let mut tree = QuadTree::new(1, 18);
        let both = TestItem::with(
            1,
            GeoBounds::new(10.0, -10.0, -10.0, 10.0),
            f64::MAX,
            RenderPass::all(),
        );
        tree.insert(both);
        let mut out = Vec::new();
        tree.collect(
            &query(GeoBounds::new(5.0, -5.0, -5.0, 5.0), 0.0),
            &AbortToken::never(),
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].passes, RenderPass::all());
    }

    #[test]
    fn test_clear_detaches_items() {
        let mut tree = QuadTree::new(1, 18);
        let a = TestItem::new(1, GeoBounds::point(1.0, 1.0));
        let b = TestItem::new(2, GeoBounds::new(10.0, -10.0, -10.0, 10.0));
        tree.insert(a.clone());
        tree.insert(b.clone());

        let detached = tree.clear();
        assert_eq!(detached.len(), 2);
        assert!(tree.is_empty());
        assert_eq!(tree.node_count(), 1);
        assert!(!a.slot.is_attached());
        assert!(tree.insert(a.clone()));
    }

    #[test]
    fn test_for_each_item_visits_all() {
        let mut tree = QuadTree::new(1, 18);
        for i in 0..50 {
            let lat = -80.0 + i as f64 * 3.0;
            tree.insert(TestItem::new(i, GeoBounds::point(lat, lat * 2.0)));
        }
        let mut seen = 0;
        tree.for_each_item(|_| seen += 1);
        assert_eq!(seen, 50);
    }

    #[test]
    fn test_debug_lists_held_item_ids() {
        let mut tree = QuadTree::new(1, 18);
        tree.insert(TestItem::new(7, GeoBounds::new(10.0, -10.0, -10.0, 10.0)));
        let dump = format!("{tree:?}");
        assert!(dump.contains("QuadTreeNode"), "{dump}");
        assert!(dump.contains("ItemId(7)"), "{dump}");
    }

    #[test]
    fn test_invalid_bounds_stay_at_root() {
        let mut tree = QuadTree::new(1, 18);
        let odd = TestItem::new(1, GeoBounds::new(f64::NAN, 0.0, 0.0, 1.0));
        assert!(tree.insert(odd.clone()));
        assert_eq!(tree.node_of(odd.as_ref()), Some(tree.root()));
        assert!(tree.remove(odd.as_ref()));
    }
}
