//! Geographic bounding boxes and query viewports
//!
//! Bounds are expressed in degrees with longitude on the x axis and latitude on
//! the y axis. Altitude limits are optional: a NaN limit means the item does not
//! know its vertical extent, and a conservative [`AltitudeBand`] is substituted
//! wherever a 3D test needs one.

use crate::utils;
use geo::{Coord, Rect};
use smallvec::{SmallVec, smallvec};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Vertical envelope (meters) used for items that do not report their altitude
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AltitudeBand {
    /// Lowest altitude in meters
    pub min: f64,
    /// Highest altitude in meters
    pub max: f64,
}

impl AltitudeBand {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl Default for AltitudeBand {
    fn default() -> Self {
        // Roughly the Dead Sea shore up to well above the highest summits
        Self::new(-900.0, 19_000.0)
    }
}

/// Axis-aligned geographic bounding box with optional altitude limits
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GeoBounds {
    /// Horizontal extent (x = longitude, y = latitude) in degrees
    rect: Rect<f64>,
    /// Minimum altitude in meters, NaN when unknown
    min_altitude: f64,
    /// Maximum altitude in meters, NaN when unknown
    max_altitude: f64,
}

impl GeoBounds {
    /// Create bounds from the north-west and south-east corners, without altitude.
    ///
    /// Bounds never wrap around the antimeridian: the corners are normalized,
    /// so `west > east` yields the box between the two meridians that does not
    /// cross ±180°. Content spanning the antimeridian must report the full
    /// longitude range (or be split into one item per side). Only
    /// [`Viewport`]s carry a wrapping flag.
    pub fn new(north: f64, west: f64, south: f64, east: f64) -> Self {
        Self {
            rect: Rect::new(Coord { x: west, y: south }, Coord { x: east, y: north }),
            min_altitude: f64::NAN,
            max_altitude: f64::NAN,
        }
    }

    /// Bounds of a single point
    pub fn point(lat: f64, lon: f64) -> Self {
        Self::new(lat, lon, lat, lon)
    }

    /// Bounds covering the whole globe
    pub fn world() -> Self {
        Self::new(
            utils::MAX_LATITUDE,
            utils::MIN_LONGITUDE,
            utils::MIN_LATITUDE,
            utils::MAX_LONGITUDE,
        )
    }

    /// Attach altitude limits (meters). NaN leaves a limit unbounded.
    pub fn with_altitude(mut self, min_altitude: f64, max_altitude: f64) -> Self {
        self.min_altitude = min_altitude;
        self.max_altitude = max_altitude;
        self
    }

    #[inline]
    pub fn north(&self) -> f64 {
        self.rect.max().y
    }

    #[inline]
    pub fn south(&self) -> f64 {
        self.rect.min().y
    }

    #[inline]
    pub fn east(&self) -> f64 {
        self.rect.max().x
    }

    #[inline]
    pub fn west(&self) -> f64 {
        self.rect.min().x
    }

    #[inline]
    pub fn min_altitude(&self) -> f64 {
        self.min_altitude
    }

    #[inline]
    pub fn max_altitude(&self) -> f64 {
        self.max_altitude
    }

    /// Latitude span in degrees
    #[inline]
    pub fn height(&self) -> f64 {
        self.rect.height()
    }

    /// Longitude span in degrees
    #[inline]
    pub fn width(&self) -> f64 {
        self.rect.width()
    }

    /// The horizontal rectangle (x = longitude, y = latitude)
    #[inline]
    pub fn rect(&self) -> Rect<f64> {
        self.rect
    }

    /// Whether all horizontal limits are finite numbers
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.north().is_finite()
            && self.south().is_finite()
            && self.east().is_finite()
            && self.west().is_finite()
    }

    /// Returns true if `other` lies entirely within these bounds (edges inclusive)
    #[inline]
    pub fn contains(&self, other: &GeoBounds) -> bool {
        other.west() >= self.west()
            && other.east() <= self.east()
            && other.south() >= self.south()
            && other.north() <= self.north()
    }

    /// Returns true if the two boxes overlap or touch
    #[inline]
    pub fn intersects(&self, other: &GeoBounds) -> bool {
        !(other.west() > self.east()
            || other.east() < self.west()
            || other.south() > self.north()
            || other.north() < self.south())
    }

    /// Center as `(lat, lon)`
    #[inline]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.north() + self.south()) / 2.0,
            (self.east() + self.west()) / 2.0,
        )
    }

    /// One of the four equal quadrants of these bounds.
    ///
    /// Quadrants are numbered row-major from the north-west corner:
    /// 0 = NW, 1 = NE, 2 = SW, 3 = SE.
    pub fn quadrant(&self, index: usize) -> GeoBounds {
        debug_assert!(index < 4, "quadrant index out of range: {index}");
        let half_lat = self.height() / 2.0;
        let half_lng = self.width() / 2.0;
        let q_north = self.north() - half_lat * (index / 2) as f64;
        let q_west = self.west() + half_lng * (index % 2) as f64;
        GeoBounds::new(q_north, q_west, q_north - half_lat, q_west + half_lng)
    }

    /// Altitude limits, substituting the fallback band for unknown limits
    pub fn altitude_band(&self, fallback: AltitudeBand) -> AltitudeBand {
        let min = if self.min_altitude.is_finite() {
            self.min_altitude
        } else {
            fallback.min
        };
        let max = if self.max_altitude.is_finite() {
            self.max_altitude
        } else {
            fallback.max
        };
        if min <= max {
            AltitudeBand::new(min, max)
        } else {
            AltitudeBand::new(max, min)
        }
    }
}

impl PartialEq for GeoBounds {
    fn eq(&self, other: &Self) -> bool {
        // Unknown altitudes compare equal to each other
        let same = |a: f64, b: f64| a == b || (a.is_nan() && b.is_nan());
        self.rect == other.rect
            && same(self.min_altitude, other.min_altitude)
            && same(self.max_altitude, other.max_altitude)
    }
}

/// The geographic area currently shown by the map
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    pub north: f64,
    pub west: f64,
    pub south: f64,
    pub east: f64,
    /// Whether the visible area wraps across the ±180° meridian
    pub crosses_antimeridian: bool,
}

impl Viewport {
    /// Create a viewport. A west bound greater than the east bound means the
    /// view wraps across the antimeridian.
    pub fn new(north: f64, west: f64, south: f64, east: f64) -> Self {
        Self {
            north,
            west,
            south,
            east,
            crosses_antimeridian: west > east,
        }
    }

    /// Viewport covering the whole globe
    pub fn world() -> Self {
        Self::new(
            utils::MAX_LATITUDE,
            utils::MIN_LONGITUDE,
            utils::MIN_LATITUDE,
            utils::MAX_LONGITUDE,
        )
    }

    /// The regions that must be queried to cover this viewport.
    ///
    /// A viewport crossing the antimeridian is split into `[west, 180]` and
    /// `[-180, east]`; any other viewport is queried as a single region.
    pub fn query_regions(&self) -> SmallVec<[GeoBounds; 2]> {
        if self.crosses_antimeridian {
            smallvec![
                GeoBounds::new(self.north, self.west, self.south, utils::MAX_LONGITUDE),
                GeoBounds::new(self.north, utils::MIN_LONGITUDE, self.south, self.east),
            ]
        } else {
            smallvec![GeoBounds::new(self.north, self.west, self.south, self.east)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_bounds_do_not_wrap() {
        // West of east across ±180 normalizes to the non-crossing box
        let bounds = GeoBounds::new(10.0, 170.0, -10.0, -170.0);
        assert_eq!(bounds.west(), -170.0);
        assert_eq!(bounds.east(), 170.0);
        assert_eq!(bounds.width(), 340.0);

        // Wrapping is expressed by the viewport, which splits at ±180
        let view = Viewport::new(10.0, 170.0, -10.0, -170.0);
        assert!(view.crosses_antimeridian);
        let regions = view.query_regions();
        assert_eq!(regions.len(), 2);
        assert!(regions.iter().all(|r| r.width() == 10.0));
    }

    #[test]
    fn test_contains_and_intersects() {
        let outer = GeoBounds::new(10.0, -10.0, -10.0, 10.0);
        let inner = GeoBounds::new(5.0, -5.0, -5.0, 5.0);
        let touching = GeoBounds::new(20.0, 10.0, 10.0, 20.0);
        let disjoint = GeoBounds::new(40.0, 30.0, 30.0, 40.0);

        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains(&outer));
        assert!(outer.intersects(&touching));
        assert!(!outer.intersects(&disjoint));
    }

    #[test]
    fn test_quadrants_tile_parent() {
        let world = GeoBounds::world();
        let nw = world.quadrant(0);
        let ne = world.quadrant(1);
        let sw = world.quadrant(2);
        let se = world.quadrant(3);

        assert_eq!(nw, GeoBounds::new(90.0, -180.0, 0.0, 0.0));
        assert_eq!(ne, GeoBounds::new(90.0, 0.0, 0.0, 180.0));
        assert_eq!(sw, GeoBounds::new(0.0, -180.0, -90.0, 0.0));
        assert_eq!(se, GeoBounds::new(0.0, 0.0, -90.0, 180.0));
        for q in [nw, ne, sw, se] {
            assert!(world.contains(&q));
        }
    }

    #[test]
    fn test_altitude_band_fallback() {
        let fallback = AltitudeBand::default();
        let unknown = GeoBounds::point(1.0, 1.0);
        assert_eq!(unknown.altitude_band(fallback), fallback);

        let partial = GeoBounds::point(1.0, 1.0).with_altitude(100.0, f64::NAN);
        assert_eq!(
            partial.altitude_band(fallback),
            AltitudeBand::new(100.0, 19_000.0)
        );

        let known = GeoBounds::point(1.0, 1.0).with_altitude(10.0, 20.0);
        assert_eq!(known.altitude_band(fallback), AltitudeBand::new(10.0, 20.0));
    }

    #[test]
    fn test_viewport_split_at_antimeridian() {
        let plain = Viewport::new(10.0, -20.0, -10.0, 20.0);
        assert!(!plain.crosses_antimeridian);
        assert_eq!(plain.query_regions().len(), 1);

        let wrapped = Viewport::new(10.0, 170.0, -10.0, -170.0);
        assert!(wrapped.crosses_antimeridian);
        let regions = wrapped.query_regions();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0], GeoBounds::new(10.0, 170.0, -10.0, 180.0));
        assert_eq!(regions[1], GeoBounds::new(10.0, -180.0, -10.0, -170.0));
    }

    #[test]
    fn test_center() {
        let b = GeoBounds::new(10.0, 20.0, 0.0, 40.0);
        assert_eq!(b.center(), (5.0, 30.0));
    }
}
