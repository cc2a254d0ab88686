//! Map Render Demo - Headless Driver Library
//!
//! Populates a [`map_render_index::QuadtreeRenderer`] with synthetic vehicles
//! and zones, moves the vehicles from tokio tasks, and runs a simulated render
//! loop that draws and hit-tests the published lists.

pub mod fleet;
pub mod logging;
pub mod settings;
pub mod simulation;

pub use settings::Settings;
pub use simulation::{DemoError, Summary, run};
