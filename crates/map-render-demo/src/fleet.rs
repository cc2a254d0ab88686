//! Synthetic map content: moving vehicles and static zones

use map_render_index::{
    Batchable, Control, DrawContext, GeoBounds, GroupId, ItemCapabilities, ItemId, ItemKind,
    ItemRef, ItemRegistry, MapItem, NodeSlot, RenderPass, Subject,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub const VEHICLE: ItemKind = ItemKind("vehicle");
pub const ZONE: ItemKind = ItemKind("zone");

/// Application-side description of something to put on the map
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FleetObject {
    Vehicle {
        id: u64,
        lat: f64,
        lon: f64,
        heading_deg: f64,
    },
    Zone {
        id: u64,
        bounds: GeoBounds,
        /// Zones of one site share a group and draw as one shape
        site: u64,
    },
}

/// A vehicle icon. Drawn in the sprite pass, batched with its neighbours.
#[derive(Debug)]
pub struct Vehicle {
    id: u64,
    /// (lat, lon, heading)
    pose: Mutex<(f64, f64, f64)>,
    indicator_lines: AtomicBool,
    slot: NodeSlot,
    releases: AtomicUsize,
    counters: Arc<DrawCounters>,
}

impl Vehicle {
    pub fn new(id: u64, lat: f64, lon: f64, heading_deg: f64, counters: Arc<DrawCounters>) -> Self {
        Self {
            id,
            pose: Mutex::new((lat, lon, heading_deg)),
            indicator_lines: AtomicBool::new(false),
            slot: NodeSlot::new(),
            releases: AtomicUsize::new(0),
            counters,
        }
    }

    /// Advance along the heading by `step` degrees, bouncing off the poles
    /// and wrapping across the antimeridian
    pub fn advance(&self, step: f64) {
        let mut pose = self.pose.lock().unwrap_or_else(PoisonError::into_inner);
        let (lat, lon, heading) = &mut *pose;
        let (sin, cos) = heading.to_radians().sin_cos();
        *lat += cos * step;
        *lon += sin * step;
        if lat.abs() > 85.0 {
            *lat = lat.clamp(-85.0, 85.0);
            *heading = 180.0 - *heading;
        }
        if *lon > 180.0 {
            *lon -= 360.0;
        } else if *lon < -180.0 {
            *lon += 360.0;
        }
    }

    pub fn position(&self) -> (f64, f64) {
        let (lat, lon, _) = *self.pose.lock().unwrap_or_else(PoisonError::into_inner);
        (lat, lon)
    }

    pub fn shows_indicator_lines(&self) -> bool {
        self.indicator_lines.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Relaxed)
    }
}

impl MapItem for Vehicle {
    fn id(&self) -> ItemId {
        ItemId(self.id)
    }

    fn subject(&self) -> Subject {
        Subject::new(1.0)
    }

    fn bounds(&self) -> GeoBounds {
        let (lat, lon) = self.position();
        GeoBounds::point(lat, lon)
    }

    fn min_draw_resolution(&self) -> f64 {
        // Icons disappear once a pixel covers more than 5 km
        5_000.0
    }

    fn render_pass(&self) -> RenderPass {
        RenderPass::SPRITES
    }

    fn draw(&self, ctx: &mut dyn DrawContext, _pass: RenderPass) {
        self.counters.items.fetch_add(1, Ordering::Relaxed);
        if self.shows_indicator_lines() && ctx.draw_tilt() > 0.0 {
            self.counters.indicator_lines.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    fn as_batchable(&self) -> Option<&dyn Batchable> {
        Some(self)
    }

    fn node_slot(&self) -> &NodeSlot {
        &self.slot
    }

    fn kind(&self) -> &str {
        VEHICLE.0
    }

    fn capabilities(&self) -> ItemCapabilities {
        ItemCapabilities::INDICATOR_LINES
    }

    fn apply_control(&self, control: Control) {
        if let Control::ShowIndicatorLines(enabled) = control {
            self.indicator_lines.store(enabled, Ordering::Relaxed);
        }
    }
}

impl Batchable for Vehicle {
    fn batch(&self, ctx: &mut dyn DrawContext, _pass: RenderPass) {
        self.counters.batched_items.fetch_add(1, Ordering::Relaxed);
        if self.shows_indicator_lines() && ctx.draw_tilt() > 0.0 {
            self.counters.indicator_lines.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A flat area drawn in the surface pass
#[derive(Debug)]
pub struct Zone {
    id: u64,
    bounds: GeoBounds,
    site: u64,
    clamp_at_nadir: AtomicBool,
    slot: NodeSlot,
    counters: Arc<DrawCounters>,
}

impl MapItem for Zone {
    fn id(&self) -> ItemId {
        ItemId(self.id)
    }

    fn subject(&self) -> Subject {
        Subject::new(0.0).in_group(GroupId(self.site), true)
    }

    fn bounds(&self) -> GeoBounds {
        self.bounds
    }

    fn min_draw_resolution(&self) -> f64 {
        f64::MAX
    }

    fn render_pass(&self) -> RenderPass {
        RenderPass::SURFACE
    }

    fn draw(&self, _ctx: &mut dyn DrawContext, _pass: RenderPass) {
        self.counters.items.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self) {}

    fn node_slot(&self) -> &NodeSlot {
        &self.slot
    }

    fn kind(&self) -> &str {
        ZONE.0
    }

    fn capabilities(&self) -> ItemCapabilities {
        ItemCapabilities::NADIR_CLAMP
    }

    fn apply_control(&self, control: Control) {
        if let Control::ClampToGroundAtNadir(enabled) = control {
            self.clamp_at_nadir.store(enabled, Ordering::Relaxed);
        }
    }
}

/// Draw calls made by items, shared by every item of one fleet
#[derive(Debug, Default)]
pub struct DrawCounters {
    pub items: AtomicUsize,
    pub batched_items: AtomicUsize,
    pub indicator_lines: AtomicUsize,
}

impl DrawCounters {
    /// Read and reset as (items, batched items, indicator lines)
    pub fn take(&self) -> (usize, usize, usize) {
        (
            self.items.swap(0, Ordering::Relaxed),
            self.batched_items.swap(0, Ordering::Relaxed),
            self.indicator_lines.swap(0, Ordering::Relaxed),
        )
    }
}

/// The demo's draw context: counts batch brackets
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameStats {
    pub tilt: f64,
    pub batches: usize,
    open: bool,
}

impl FrameStats {
    pub fn new(tilt: f64) -> Self {
        Self {
            tilt,
            ..Self::default()
        }
    }
}

impl DrawContext for FrameStats {
    fn batch_begin(&mut self) {
        debug_assert!(!self.open, "batch already open");
        self.open = true;
        self.batches += 1;
    }

    fn batch_end(&mut self) {
        self.open = false;
    }

    fn draw_tilt(&self) -> f64 {
        self.tilt
    }
}

/// Registry with factories for every [`FleetObject`] variant.
///
/// Vehicles are also pushed to `vehicles` so the movers can reach them.
pub fn registry(
    vehicles: Arc<Mutex<Vec<Arc<Vehicle>>>>,
    counters: Arc<DrawCounters>,
) -> ItemRegistry<FleetObject> {
    let zone_counters = Arc::clone(&counters);
    ItemRegistry::new()
        .with(VEHICLE, move |object: &FleetObject| -> Option<ItemRef> {
            let FleetObject::Vehicle {
                id,
                lat,
                lon,
                heading_deg,
            } = *object
            else {
                return None;
            };
            let vehicle = Arc::new(Vehicle::new(
                id,
                lat,
                lon,
                heading_deg,
                Arc::clone(&counters),
            ));
            vehicles
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::clone(&vehicle));
            Some(vehicle)
        })
        .with(ZONE, move |object: &FleetObject| -> Option<ItemRef> {
            let FleetObject::Zone { id, bounds, site } = *object else {
                return None;
            };
            bounds.is_valid().then(|| {
                Arc::new(Zone {
                    id,
                    bounds,
                    site,
                    clamp_at_nadir: AtomicBool::new(false),
                    slot: NodeSlot::new(),
                    counters: Arc::clone(&zone_counters),
                }) as ItemRef
            })
        })
}

/// Deterministic spread of objects around a few hubs
pub fn generate(vehicles: usize, zones: usize) -> Vec<(ItemKind, FleetObject)> {
    const HUBS: [(f64, f64); 4] = [(51.5, -0.1), (40.7, -74.0), (-33.9, 151.2), (64.1, -179.0)];

    let vehicle_objects = (0..vehicles).map(|i| {
        let (hub_lat, hub_lon) = HUBS[i % HUBS.len()];
        let t = i as f64;
        (
            VEHICLE,
            FleetObject::Vehicle {
                id: i as u64,
                lat: hub_lat + (t * 0.37).sin() * 2.0,
                lon: hub_lon + (t * 0.23).cos() * 2.0,
                heading_deg: (t * 47.0) % 360.0,
            },
        )
    });
    let zone_objects = (0..zones).map(|i| {
        let (hub_lat, hub_lon) = HUBS[i % HUBS.len()];
        let t = i as f64;
        let lat = hub_lat + (t * 0.71).sin() * 3.0;
        let lon = hub_lon + (t * 0.53).cos() * 3.0;
        (
            ZONE,
            FleetObject::Zone {
                id: (vehicles + i) as u64,
                bounds: GeoBounds::new(lat + 0.2, lon, lat, lon + 0.3),
                site: (i / 3) as u64,
            },
        )
    });
    vehicle_objects.chain(zone_objects).collect()
}
