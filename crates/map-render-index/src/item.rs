//! Contracts between the index and the renderable map items it holds
//!
//! Items are owned by application code and shared with the index through
//! [`ItemRef`]. The index never owns an item's drawing state; it only keeps a
//! non-owning [`NodeSlot`] on each item so it can find the quadtree cell that
//! currently holds it.

use crate::bounds::GeoBounds;
use crate::quadtree::NodeId;
use bitflags::bitflags;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

bitflags! {
    /// Render passes an item draws in
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderPass: u8 {
        /// Ground-projected content
        const SURFACE = 0b01;
        /// Screen-facing content (icons, labels, extruded shapes)
        const SPRITES = 0b10;
    }
}

bitflags! {
    /// Optional behaviours an item opts into
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ItemCapabilities: u8 {
        /// Draws auxiliary indicator lines (e.g. altitude stems) when enabled
        const INDICATOR_LINES = 0b01;
        /// Can clamp itself to the ground when the camera looks straight down
        const NADIR_CLAMP = 0b10;
    }
}

/// Global toggles propagated to every item with the matching capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    ShowIndicatorLines(bool),
    ClampToGroundAtNadir(bool),
}

impl Control {
    /// The capability an item needs to receive this control
    pub fn capability(&self) -> ItemCapabilities {
        match self {
            Control::ShowIndicatorLines(_) => ItemCapabilities::INDICATOR_LINES,
            Control::ClampToGroundAtNadir(_) => ItemCapabilities::NADIR_CLAMP,
        }
    }
}

/// Stable identity of an item (the subject's serial id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a group of items in the application's map hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u64);

/// Ordering-relevant facts about the application object an item renders
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Subject {
    /// Application-defined draw order; lower values draw first
    pub z_order: f64,
    /// Group this item's subject belongs to
    pub group: Option<GroupId>,
    /// Group holding this subject's children, for shapes that own markers
    pub child_group: Option<GroupId>,
    /// The subject's group represents one visual shape
    pub group_is_shape: bool,
}

impl Subject {
    pub fn new(z_order: f64) -> Self {
        Self {
            z_order,
            group: None,
            child_group: None,
            group_is_shape: false,
        }
    }

    pub fn in_group(mut self, group: GroupId, group_is_shape: bool) -> Self {
        self.group = Some(group);
        self.group_is_shape = group_is_shape;
        self
    }

    pub fn with_child_group(mut self, child_group: GroupId) -> Self {
        self.child_group = Some(child_group);
        self
    }

    /// Whether two subjects belong to the same logical shape and must keep
    /// their relative z-order regardless of camera distance. Symmetric: a
    /// group counts as a shape when either member says so.
    pub fn is_related_to(&self, other: &Subject) -> bool {
        let (Some(group), Some(other_group)) = (self.group, other.group) else {
            return false;
        };
        Some(group) == other.child_group
            || Some(other_group) == self.child_group
            || (group == other_group && (self.group_is_shape || other.group_is_shape))
    }
}

/// Render-thread drawing surface handed to items and batches
pub trait DrawContext {
    /// Start accumulating batched geometry
    fn batch_begin(&mut self);
    /// Flush accumulated geometry as one draw call
    fn batch_end(&mut self);
    /// Current camera tilt in degrees
    fn draw_tilt(&self) -> f64 {
        0.0
    }
}

/// Items able to append their geometry to a shared batch
pub trait Batchable {
    /// Whether the item can batch in the current context and pass
    fn is_batchable(&self, _ctx: &dyn DrawContext, _pass: RenderPass) -> bool {
        true
    }

    /// Append geometry to the open batch of `ctx`
    fn batch(&self, ctx: &mut dyn DrawContext, pass: RenderPass);
}

/// A renderable map entity
///
/// All methods may be called from the query worker except [`MapItem::draw`],
/// [`MapItem::release`] and [`Batchable::batch`], which only run on the
/// render thread.
pub trait MapItem: Send + Sync {
    fn id(&self) -> ItemId;

    fn subject(&self) -> Subject;

    /// Current geographic bounds. These never wrap across the antimeridian,
    /// see [`GeoBounds::new`].
    fn bounds(&self) -> GeoBounds;

    /// Coarsest map resolution at which the item is still drawn
    fn min_draw_resolution(&self) -> f64;

    fn render_pass(&self) -> RenderPass;

    fn draw(&self, ctx: &mut dyn DrawContext, pass: RenderPass);

    /// Free any GPU-side state. The item may be drawn again later.
    fn release(&self);

    fn as_batchable(&self) -> Option<&dyn Batchable> {
        None
    }

    /// Back-reference slot used by the index
    fn node_slot(&self) -> &NodeSlot;

    /// Short type name used in diagnostics
    fn kind(&self) -> &str {
        "item"
    }

    fn capabilities(&self) -> ItemCapabilities {
        ItemCapabilities::empty()
    }

    fn apply_control(&self, _control: Control) {}
}

/// Shared handle to an item
pub type ItemRef = Arc<dyn MapItem>;

/// Where an item currently lives: which index, and which node in it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    pub tree: u64,
    pub node: NodeId,
}

/// Non-owning back-reference from an item to the quadtree node holding it.
///
/// Written only while the owning index's structural lock is held.
#[derive(Debug, Default)]
pub struct NodeSlot {
    inner: Mutex<Option<NodeRef>>,
}

impl NodeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<NodeRef> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, value: Option<NodeRef>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Whether the item is currently held by any index
    pub fn is_attached(&self) -> bool {
        self.get().is_some()
    }
}

/// One-line description of an item for log messages
pub(crate) fn describe(item: &dyn MapItem) -> String {
    let subject = item.subject();
    match subject.group {
        Some(group) => format!(
            "{} {}, z={}, in group {}",
            item.kind(),
            item.id(),
            subject.z_order,
            group.0
        ),
        None => format!(
            "{} {}, z={} (no group)",
            item.kind(),
            item.id(),
            subject.z_order
        ),
    }
}
