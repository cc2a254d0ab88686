//! The simulated application: movers on tokio tasks, one render loop

use crate::fleet::{self, DrawCounters, FrameStats, Vehicle};
use crate::settings::Settings;
use map_render_index::{
    GeoPoint, IndexError, ItemRef, Projection, QuadtreeRenderer, RenderPass, SceneModel,
    ViewState, Viewport,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Errors that end the simulation early
#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("Render index error: {0}")]
    Index(#[from] IndexError),

    #[error("Mover task failed: {0}")]
    Mover(#[from] tokio::task::JoinError),
}

/// What happened during a run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Summary {
    pub items: usize,
    pub declined: usize,
    pub frames: u64,
    pub items_drawn: usize,
    pub batched_items: usize,
    pub batches: usize,
    pub indicator_lines: usize,
    pub hit_tests: usize,
    pub hits: usize,
    pub moves: u64,
    pub vehicle_releases: usize,
}

const MOVE_TICK: Duration = Duration::from_millis(20);
const MOVE_STEP_DEG: f64 = 0.002;

fn wrap_lon(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// Map view for `frame`: a slow pan over the first hub, then across the
/// antimeridian for the second half of the run
pub fn view_for_frame(frame: u64, frames: u64, tilt: f64) -> ViewState {
    let t = frame as f64;
    let (lat, lon) = if frame <= frames / 2 {
        (51.5, -0.6 + t * 0.002)
    } else {
        (64.1, wrap_lon(179.5 + (t - frames as f64 / 2.0) * 0.004))
    };
    let viewport = Viewport::new(lat + 0.5, wrap_lon(lon - 0.8), lat - 0.5, wrap_lon(lon + 0.8));
    let view = ViewState::flat(viewport, 50.0, frame);
    if tilt <= 0.0 {
        return view;
    }

    let distance = 60_000.0;
    let (sin, cos) = tilt.to_radians().sin_cos();
    let camera = GeoPoint::new(lat - distance * sin / 111_000.0, lon, distance * cos);
    let scene = SceneModel::look_at(
        camera,
        GeoPoint::new(lat, lon, 0.0),
        Projection::Perspective {
            fov_y_deg: 45.0,
            aspect: 16.0 / 9.0,
        },
        10.0,
        1_000_000.0,
    );
    view.with_scene(scene)
}

fn spawn_movers(
    renderer: &Arc<QuadtreeRenderer<fleet::FleetObject>>,
    vehicles: Vec<Arc<Vehicle>>,
    movers: usize,
    stop: &watch::Receiver<bool>,
) -> Vec<JoinHandle<u64>> {
    let chunk = vehicles.len().div_ceil(movers.max(1)).max(1);
    vehicles
        .chunks(chunk)
        .enumerate()
        .map(|(n, chunk)| {
            let chunk = chunk.to_vec();
            let renderer = Arc::clone(renderer);
            let mut stop = stop.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(MOVE_TICK);
                let mut moves = 0u64;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = stop.changed() => break,
                    }
                    for vehicle in &chunk {
                        vehicle.advance(MOVE_STEP_DEG);
                        renderer.notify_bounds_changed(Arc::clone(vehicle) as ItemRef);
                    }
                    moves += chunk.len() as u64;
                }
                tracing::debug!(mover = n, moves, "Mover stopped");
                moves
            })
        })
        .collect()
}

/// Populate a renderer, move its vehicles concurrently and render `frames`
/// frames, hit testing the view every so often
pub async fn run(settings: &Settings) -> Result<Summary, DemoError> {
    let counters = Arc::new(DrawCounters::default());
    let vehicles = Arc::new(Mutex::new(Vec::new()));
    let registry = fleet::registry(Arc::clone(&vehicles), Arc::clone(&counters));
    let renderer = Arc::new(QuadtreeRenderer::new(
        settings.index_config(),
        Arc::new(registry),
    )?);

    let mut summary = Summary::default();
    for (kind, object) in fleet::generate(settings.vehicles, settings.zones) {
        match renderer.add_subject(kind, &object)? {
            Some(_) => summary.items += 1,
            None => summary.declined += 1,
        }
    }
    tracing::info!(
        items = summary.items,
        declined = summary.declined,
        "Index populated"
    );

    let vehicles = std::mem::take(&mut *vehicles.lock().unwrap_or_else(PoisonError::into_inner));
    let (stop_tx, stop_rx) = watch::channel(false);
    let movers = spawn_movers(&renderer, vehicles.clone(), settings.movers, &stop_rx);

    let mut ticker = tokio::time::interval(settings.frame_interval());
    for frame in 1..=settings.frames {
        ticker.tick().await;
        #[cfg(feature = "profiling")]
        profiling::scope!("frame");

        if frame == settings.frames / 2 {
            renderer.set_show_indicator_lines(true);
            renderer.set_clamp_to_ground_at_nadir(true);
        }
        if frame == settings.frames / 3 {
            renderer.suspend();
        } else if frame == settings.frames / 3 + 10 {
            renderer.resume();
        }

        let view = view_for_frame(frame, settings.frames, settings.tilt);
        let mut ctx = FrameStats::new(view.tilt);
        renderer.draw(&mut ctx, RenderPass::all(), &view)?;

        let (items, batched, lines) = counters.take();
        summary.items_drawn += items;
        summary.batched_items += batched;
        summary.indicator_lines += lines;
        summary.batches += ctx.batches;
        summary.frames = frame;

        if settings.hit_test_every > 0 && frame % settings.hit_test_every == 0 {
            let hits = renderer.hit_test_list();
            let items = hits.items();
            summary.hit_tests += 1;
            summary.hits += items.len();
            tracing::debug!(
                frame,
                state = ?renderer.state(),
                list_version = hits.version(),
                topmost = ?items.first().map(|i| i.id()),
                candidates = items.len(),
                "Hit test"
            );
        }
    }

    let _ = stop_tx.send(true);
    for mover in movers {
        summary.moves += mover.await?;
    }

    renderer.release();
    summary.vehicle_releases = vehicles.iter().map(|v| v.releases()).sum();
    tracing::info!(?summary, "Simulation finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_views_cross_the_antimeridian_late() {
        let early = view_for_frame(10, 100, 0.0);
        assert!(!early.viewport.crosses_antimeridian);
        let late = view_for_frame(60, 100, 0.0);
        assert!(late.viewport.crosses_antimeridian);
        assert_eq!(late.draw_version, 60);
    }

    #[test]
    fn test_tilted_view_has_scene() {
        let view = view_for_frame(1, 100, 45.0);
        let scene = view.scene.expect("tilted view has a camera");
        assert!((scene.tilt - 45.0).abs() < 2.0);
        assert!(view.tilt > 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_short_run() {
        let settings = Settings::parse_from([
            "map-render-demo",
            "--vehicles",
            "200",
            "--zones",
            "20",
            "--frames",
            "40",
            "--fps",
            "200",
            "--hit-test-every",
            "5",
        ]);
        let summary = run(&settings).await.unwrap();
        assert_eq!(summary.items, 220);
        assert_eq!(summary.frames, 40);
        assert_eq!(summary.hit_tests, 8);
    }
}
