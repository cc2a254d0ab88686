//! Utility functions for geodetic conversions and distance measurements

use glam::DVec3;

/// WGS-84 semi-major axis in meters
pub const WGS84_SEMI_MAJOR: f64 = 6_378_137.0;

/// WGS-84 first eccentricity squared
pub const WGS84_E2: f64 = 6.694_379_990_141_33e-3;

/// Latitude limits of the quadtree root
pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;

/// Longitude limits of the quadtree root
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

/// Convert WGS84 (lat, lon, altitude) to Earth-centered, Earth-fixed coordinates in meters
///
/// # Arguments
/// * `lat` - Latitude in degrees
/// * `lon` - Longitude in degrees
/// * `alt` - Height above the ellipsoid in meters
#[inline(always)]
pub fn wgs84_to_ecef(lat: f64, lon: f64, alt: f64) -> DVec3 {
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();
    let (sin_lat, cos_lat) = lat_rad.sin_cos();
    let (sin_lon, cos_lon) = lon_rad.sin_cos();

    // Prime vertical radius of curvature
    let n = WGS84_SEMI_MAJOR / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();

    DVec3::new(
        (n + alt) * cos_lat * cos_lon,
        (n + alt) * cos_lat * sin_lon,
        (n * (1.0 - WGS84_E2) + alt) * sin_lat,
    )
}

/// Local "up" unit vector (ellipsoid normal) at the given geodetic position
#[inline(always)]
pub fn surface_normal(lat: f64, lon: f64) -> DVec3 {
    let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
    DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat)
}

/// Straight-line (slant) distance between two ECEF positions
#[inline(always)]
pub fn slant_distance(a: DVec3, b: DVec3) -> f64 {
    a.distance(b)
}
