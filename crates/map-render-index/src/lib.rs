//! Map Render Index - Spatial Index and Asynchronous Render Lists for Map Items
//!
//! This library keeps a large, changing population of geographic map items in a
//! thread-safe quadtree and turns it into per-frame draw lists on a background
//! worker. The render thread only ever draws the most recently published list.
//!
//! # Architecture
//!
//! - **[`QuadTree`]**: Arena quadtree over the geographic extent; items live in
//!   the shallowest cell that fully contains their bounds
//! - **[`SpatialIndex`]**: Thread-safe front of the tree with a queue of pending
//!   bounds changes and cooperative query abort
//! - **[`ordering`]**: Z-order and slant-distance depth ordering of query results
//! - **[`RenderList`]**: Immutable per-frame list with runs of batchable items
//!   folded into [`Batch`]es, plus its [`HitTestList`] view
//! - **[`AsyncRenderListBuilder`]**: Worker thread rebuilding the list whenever
//!   the view or the content changes
//! - **[`QuadtreeRenderer`]**: Application surface combining the index, the
//!   worker and an explicit [`ItemRegistry`]
//!
//! # Threading
//!
//! - Insert, remove, bounds-change notifications and queries may come from any
//!   thread; structural work is serialized by one lock per index
//! - Drawing and releasing happen on the render thread

mod batch;
mod bounds;
mod builder;
mod config;
mod frustum;
mod index;
mod item;
pub mod ordering;
mod quadtree;
mod registry;
mod render_list;
mod renderer;
mod scene;
pub mod utils;

// Public API exports
pub use batch::{Batch, Drawable};
pub use bounds::{AltitudeBand, GeoBounds, Viewport};
pub use builder::{AsyncRenderListBuilder, ResolutionState};
pub use config::IndexConfig;
pub use frustum::{Aabb, Frustum, Plane};
pub use index::{AbortSignal, AbortToken, InvalidationListener, SpatialIndex};
pub use item::{
    Batchable, Control, DrawContext, GroupId, ItemCapabilities, ItemId, ItemRef, MapItem,
    NodeRef, NodeSlot, RenderPass, Subject,
};
pub use ordering::{DepthComparator, SortOutcome};
pub use quadtree::{CollectQuery, NodeId, QuadTree, Visible};
pub use registry::{ItemFactory, ItemKind, ItemRegistry};
pub use render_list::{HitTestList, RenderList};
pub use renderer::QuadtreeRenderer;
pub use scene::{GeoPoint, Projection, SceneModel, ViewState};

/// Error types for the render index
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Failed to spawn render list worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("No item factory registered for kind '{0}'")]
    UnknownItemKind(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Renderer has been released")]
    Released,
}

pub type Result<T> = std::result::Result<T, IndexError>;
