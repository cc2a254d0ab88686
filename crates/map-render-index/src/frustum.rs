//! View-volume tests in ECEF space
//!
//! The frustum is built once per query from the [`SceneModel`]; items and
//! quadtree cells are converted to conservative ECEF boxes and tested with the
//! usual positive-vertex plane test.

use crate::bounds::{AltitudeBand, GeoBounds};
use crate::scene::{Projection, SceneModel};
use crate::utils;
use glam::DVec3;

/// Cells wider than this (degrees) are not boxed; they are assumed visible
const MAX_BOXED_SPAN_DEG: f64 = 30.0;

/// A plane `n·p + d = 0`; points with a non-negative distance are inside
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub d: f64,
}

impl Plane {
    /// Plane with the given inward normal passing through `point`
    pub fn from_point_normal(point: DVec3, normal: DVec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            d: -normal.dot(point),
        }
    }

    #[inline]
    pub fn distance(&self, p: DVec3) -> f64 {
        self.normal.dot(p) + self.d
    }
}

/// Axis-aligned box in ECEF meters
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Radius of the sphere enclosing the box
    #[inline]
    pub fn radius(&self) -> f64 {
        (self.max - self.min).length() * 0.5
    }

    /// Conservative ECEF box around a geographic box over an altitude band.
    ///
    /// Returns `None` for boxes too large to bound usefully; callers must then
    /// treat the region as potentially visible.
    pub fn from_geo_bounds(bounds: &GeoBounds, band: AltitudeBand) -> Option<Self> {
        if !bounds.is_valid()
            || bounds.width() > MAX_BOXED_SPAN_DEG
            || bounds.height() > MAX_BOXED_SPAN_DEG
        {
            return None;
        }

        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);
        for row in 0..3 {
            let lat = bounds.south() + bounds.height() * row as f64 / 2.0;
            for col in 0..3 {
                let lon = bounds.west() + bounds.width() * col as f64 / 2.0;
                for alt in [band.min, band.max] {
                    let p = utils::wgs84_to_ecef(lat, lon, alt);
                    min = min.min(p);
                    max = max.max(p);
                }
            }
        }

        // The surface bulges between grid samples
        let span = bounds.width().max(bounds.height()).to_radians();
        let sag = (utils::WGS84_SEMI_MAJOR + band.max.max(0.0)) * (1.0 - (span / 4.0).cos());
        let pad = DVec3::splat(sag + 1.0);
        Some(Self::new(min - pad, max + pad))
    }
}

/// Camera view volume as 6 inward-facing planes
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Frustum {
    pub left: Plane,
    pub right: Plane,
    pub bottom: Plane,
    pub top: Plane,
    pub near: Plane,
    pub far: Plane,
    /// Camera position, used for the slant-distance pre-check
    pub eye: DVec3,
    /// Far clip distance in meters
    pub far_distance: f64,
}

impl Frustum {
    /// Build the view volume of a camera
    pub fn from_scene(scene: &SceneModel) -> Self {
        let eye = scene.position;
        let forward = scene.forward;
        let right = scene.right();
        let up = right.cross(forward).normalize_or_zero();

        let near = Plane::from_point_normal(eye + forward * scene.near, forward);
        let far = Plane::from_point_normal(eye + forward * scene.far, -forward);

        let (left, right_plane, bottom, top) = match scene.projection {
            Projection::Perspective { fov_y_deg, aspect } => {
                let half_v = (fov_y_deg / 2.0).to_radians();
                let half_h = (half_v.tan() * aspect).atan();
                let (sin_h, cos_h) = half_h.sin_cos();
                let (sin_v, cos_v) = half_v.sin_cos();
                (
                    Plane::from_point_normal(eye, right * cos_h + forward * sin_h),
                    Plane::from_point_normal(eye, -right * cos_h + forward * sin_h),
                    Plane::from_point_normal(eye, up * cos_v + forward * sin_v),
                    Plane::from_point_normal(eye, -up * cos_v + forward * sin_v),
                )
            }
            Projection::Orthographic {
                half_width,
                half_height,
            } => (
                Plane::from_point_normal(eye - right * half_width, right),
                Plane::from_point_normal(eye + right * half_width, -right),
                Plane::from_point_normal(eye - up * half_height, up),
                Plane::from_point_normal(eye + up * half_height, -up),
            ),
        };

        Self {
            left,
            right: right_plane,
            bottom,
            top,
            near,
            far,
            eye,
            far_distance: scene.far,
        }
    }

    /// Positive-vertex test: false only if the box is entirely outside one plane
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        for plane in [
            self.left,
            self.right,
            self.bottom,
            self.top,
            self.near,
            self.far,
        ] {
            let p = DVec3::new(
                if plane.normal.x >= 0.0 {
                    aabb.max.x
                } else {
                    aabb.min.x
                },
                if plane.normal.y >= 0.0 {
                    aabb.max.y
                } else {
                    aabb.min.y
                },
                if plane.normal.z >= 0.0 {
                    aabb.max.z
                } else {
                    aabb.min.z
                },
            );
            if plane.distance(p) < 0.0 {
                return false;
            }
        }
        true
    }

    /// Cheap rejection: the nearest point of the box's bounding sphere lies past the far plane
    #[inline]
    pub fn beyond_far_distance(&self, aabb: &Aabb) -> bool {
        utils::slant_distance(self.eye, aabb.center()) - aabb.radius() > self.far_distance
    }

    /// Full sprite-pass visibility test for a geographic box
    pub fn intersects_geo_bounds(&self, bounds: &GeoBounds, fallback: AltitudeBand) -> bool {
        let band = bounds.altitude_band(fallback);
        match Aabb::from_geo_bounds(bounds, band) {
            Some(aabb) => !self.beyond_far_distance(&aabb) && self.intersects_aabb(&aabb),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::GeoPoint;

    fn nadir_scene(far: f64) -> SceneModel {
        SceneModel::look_at(
            GeoPoint::new(0.0, 0.0, 10_000.0),
            GeoPoint::new(0.0, 0.0, 0.0),
            Projection::Perspective {
                fov_y_deg: 60.0,
                aspect: 1.0,
            },
            1.0,
            far,
        )
    }

    #[test]
    fn test_point_below_camera_is_visible() {
        let frustum = Frustum::from_scene(&nadir_scene(1_000_000.0));
        let b = GeoBounds::point(0.0, 0.0);
        assert!(frustum.intersects_geo_bounds(&b, AltitudeBand::default()));
    }

    #[test]
    fn test_distant_point_is_culled() {
        let frustum = Frustum::from_scene(&nadir_scene(1_000_000.0));
        let b = GeoBounds::new(10.1, 10.0, 10.0, 10.1);
        assert!(!frustum.intersects_geo_bounds(&b, AltitudeBand::default()));
    }

    #[test]
    fn test_far_distance_precheck() {
        // Far plane closer than the ground
        let frustum = Frustum::from_scene(&nadir_scene(5_000.0));
        let b = GeoBounds::point(0.0, 0.0).with_altitude(0.0, 0.0);
        let aabb = Aabb::from_geo_bounds(&b, b.altitude_band(AltitudeBand::default())).unwrap();
        assert!(frustum.beyond_far_distance(&aabb));
        assert!(!frustum.intersects_geo_bounds(&b, AltitudeBand::default()));
    }

    #[test]
    fn test_unknown_altitude_is_conservative() {
        // Ground point ~6.1 km east: just outside the ~5.8 km ground footprint,
        // but the fallback band dips below ground where the cone is wider
        let frustum = Frustum::from_scene(&nadir_scene(1_000_000.0));
        let unknown = GeoBounds::point(0.0, 0.055);
        let ground = unknown.with_altitude(0.0, 0.0);
        assert!(frustum.intersects_geo_bounds(&unknown, AltitudeBand::default()));
        assert!(!frustum.intersects_geo_bounds(&ground, AltitudeBand::default()));
    }

    #[test]
    fn test_huge_cells_are_not_boxed() {
        let world = GeoBounds::world();
        assert!(Aabb::from_geo_bounds(&world, AltitudeBand::default()).is_none());
        let frustum = Frustum::from_scene(&nadir_scene(1_000.0));
        assert!(frustum.intersects_geo_bounds(&world, AltitudeBand::default()));
    }

    #[test]
    fn test_orthographic_frustum() {
        let scene = SceneModel::look_at(
            GeoPoint::new(0.0, 0.0, 10_000.0),
            GeoPoint::new(0.0, 0.0, 0.0),
            Projection::Orthographic {
                half_width: 2_000.0,
                half_height: 2_000.0,
            },
            1.0,
            1_000_000.0,
        );
        let frustum = Frustum::from_scene(&scene);
        assert!(frustum.intersects_geo_bounds(
            &GeoBounds::point(0.0, 0.0).with_altitude(0.0, 0.0),
            AltitudeBand::default()
        ));
        // ~11 km east, beyond the 2 km half width
        assert!(!frustum.intersects_geo_bounds(
            &GeoBounds::point(0.0, 0.1).with_altitude(0.0, 0.0),
            AltitudeBand::default()
        ));
    }
}
