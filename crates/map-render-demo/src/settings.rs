use clap::Parser;
use map_render_index::IndexConfig;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Map Render Demo - drives a quadtree renderer with moving synthetic items
pub struct Settings {
    /// Number of moving vehicles (sprite pass, batchable)
    #[clap(long, default_value = "5000")]
    pub vehicles: usize,

    /// Number of static zones (surface pass)
    #[clap(long, default_value = "200")]
    pub zones: usize,

    /// Number of concurrent tasks moving vehicles
    #[clap(long, default_value = "4")]
    pub movers: usize,

    /// Number of frames to render before exiting
    #[clap(short, long, default_value = "600")]
    pub frames: u64,

    /// Target frames per second of the simulated render loop
    #[clap(long, default_value = "60")]
    pub fps: u32,

    /// Camera tilt in degrees (0 = flat top-down view without a scene model)
    #[clap(long, default_value = "0.0")]
    pub tilt: f64,

    /// Hit-test the view center every N frames (0 disables)
    #[clap(long, default_value = "30")]
    pub hit_test_every: u64,

    /// Maximum quadtree depth
    #[clap(long, default_value = "18")]
    pub max_depth: u32,

    /// Delay before the worker captures a newly requested view, in milliseconds
    #[clap(long, default_value = "0")]
    pub capture_delay_ms: u64,
}

impl Settings {
    /// Parse from the command line, exiting with usage on error
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }

    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            max_depth: self.max_depth,
            query_state_capture_delay: Duration::from_millis(self.capture_delay_ms),
            ..IndexConfig::default()
        }
    }
}
