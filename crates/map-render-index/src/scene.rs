//! Camera and view state snapshots consumed by the query worker
//!
//! A [`ViewState`] is captured on the render thread and copied to the worker, so
//! everything here is plain data (`Clone + Send`).

use crate::bounds::Viewport;
use crate::utils;
use glam::DVec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A geodetic position (degrees, meters above the ellipsoid)
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }

    /// Position in ECEF meters
    #[inline]
    pub fn to_ecef(&self) -> DVec3 {
        utils::wgs84_to_ecef(self.lat, self.lon, self.alt)
    }
}

/// Camera projection
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Projection {
    /// Perspective projection with a vertical field of view (degrees) and width/height aspect
    Perspective { fov_y_deg: f64, aspect: f64 },
    /// Orthographic projection with half extents in meters
    Orthographic { half_width: f64, half_height: f64 },
}

impl Projection {
    #[inline]
    pub fn is_perspective(&self) -> bool {
        matches!(self, Projection::Perspective { .. })
    }
}

/// World-space (ECEF) camera model used for frustum culling and depth sorting
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SceneModel {
    /// Camera position in ECEF meters
    pub position: DVec3,
    /// Unit view direction
    pub forward: DVec3,
    /// Unit camera up vector, orthogonal to `forward`
    pub up: DVec3,
    pub projection: Projection,
    /// Near clip distance in meters
    pub near: f64,
    /// Far clip distance in meters
    pub far: f64,
    /// Angle between the view direction and straight down, in degrees
    pub tilt: f64,
    /// Distance from the camera to the point it looks at, in meters
    pub focus_distance: f64,
}

impl SceneModel {
    /// Build a camera at `camera` looking at `focus`.
    ///
    /// The camera's up vector is the local vertical projected onto the image
    /// plane; when looking straight down, north is used instead.
    pub fn look_at(
        camera: GeoPoint,
        focus: GeoPoint,
        projection: Projection,
        near: f64,
        far: f64,
    ) -> Self {
        let position = camera.to_ecef();
        let target = focus.to_ecef();
        let to_target = target - position;
        let focus_distance = to_target.length();

        let camera_vertical = utils::surface_normal(camera.lat, camera.lon);
        let forward = if focus_distance > f64::EPSILON {
            to_target / focus_distance
        } else {
            -camera_vertical
        };

        let focus_vertical = utils::surface_normal(focus.lat, focus.lon);
        let tilt = (-forward)
            .dot(focus_vertical)
            .clamp(-1.0, 1.0)
            .acos()
            .to_degrees();

        let projected = camera_vertical - forward * camera_vertical.dot(forward);
        let up = if projected.length_squared() > 1e-12 {
            projected.normalize()
        } else {
            // Nadir view: orient the image with north up
            let (sin_lat, cos_lat) = camera.lat.to_radians().sin_cos();
            let (sin_lon, cos_lon) = camera.lon.to_radians().sin_cos();
            let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
            (north - forward * north.dot(forward)).normalize_or_zero()
        };

        Self {
            position,
            forward,
            up,
            projection,
            near,
            far,
            tilt,
            focus_distance,
        }
    }

    /// Unit vector pointing to the right of the image
    #[inline]
    pub fn right(&self) -> DVec3 {
        self.forward.cross(self.up).normalize_or_zero()
    }
}

/// Snapshot of everything a render-list query needs from the map view
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViewState {
    /// Geographic area on screen
    pub viewport: Viewport,
    /// Current map resolution (meters per pixel); larger is more zoomed out
    pub draw_resolution: f64,
    /// Camera tilt in degrees, 0 for a top-down view
    pub tilt: f64,
    /// Camera model, absent for flat 2D views
    pub scene: Option<SceneModel>,
    /// Incremented by the map whenever the view changes
    pub draw_version: u64,
}

impl ViewState {
    /// A top-down view of `viewport` at `draw_resolution`
    pub fn flat(viewport: Viewport, draw_resolution: f64, draw_version: u64) -> Self {
        Self {
            viewport,
            draw_resolution,
            tilt: 0.0,
            scene: None,
            draw_version,
        }
    }

    /// Attach a camera model; the view tilt is taken from the camera
    pub fn with_scene(mut self, scene: SceneModel) -> Self {
        self.tilt = scene.tilt;
        self.scene = Some(scene);
        self
    }
}
