//! Spherical-earth geometry shared by the tracker and predictor: great-circle
//! distance, initial bearing, forward projection, and circular averaging.

use std::f64::consts::PI;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

fn to_rad(deg: f64) -> f64 {
    deg * PI / 180.0
}

fn to_deg(rad: f64) -> f64 {
    rad * 180.0 / PI
}

/// Great-circle distance between two `(lat, lon)` points in degrees, in km.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (to_rad(a.0), to_rad(a.1));
    let (lat2, lon2) = (to_rad(b.0), to_rad(b.1));
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Initial bearing from `a` to `b`, degrees clockwise from true north, in `[0, 360)`.
pub fn bearing_deg(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (to_rad(a.0), to_rad(a.1));
    let (lat2, lon2) = (to_rad(b.0), to_rad(b.1));
    let dlon = lon2 - lon1;

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    to_deg(y.atan2(x)).rem_euclid(360.0)
}

/// Spherical forward projection: from `origin`, travel `distance_km` along
/// `bearing_deg_from_north`. Altitude is not affected by horizontal motion.
pub fn destination(origin: (f64, f64), bearing_deg_from_north: f64, distance_km: f64) -> (f64, f64) {
    let lat1 = to_rad(origin.0);
    let lon1 = to_rad(origin.1);
    let brng = to_rad(bearing_deg_from_north);
    let ang_dist = distance_km / EARTH_RADIUS_KM;

    let lat2 = (lat1.sin() * ang_dist.cos() + lat1.cos() * ang_dist.sin() * brng.cos()).asin();
    let lon2 = lon1
        + (brng.sin() * ang_dist.sin() * lat1.cos())
            .atan2(ang_dist.cos() - lat1.sin() * lat2.sin());

    (to_deg(lat2), normalize_lon(to_deg(lon2)))
}

fn normalize_lon(mut lon: f64) -> f64 {
    lon = lon.rem_euclid(360.0);
    if lon > 180.0 {
        lon -= 360.0;
    }
    lon
}

/// Weighted circular mean of a set of headings (degrees), used for smoothed
/// velocity and for wind "from" direction handling.
pub fn weighted_circular_mean_deg(headings_and_weights: &[(f64, f64)]) -> Option<f64> {
    if headings_and_weights.is_empty() {
        return None;
    }
    let mut sin_sum = 0.0;
    let mut cos_sum = 0.0;
    let mut weight_sum = 0.0;
    for (heading, weight) in headings_and_weights {
        let rad = to_rad(*heading);
        sin_sum += weight * rad.sin();
        cos_sum += weight * rad.cos();
        weight_sum += weight;
    }
    if weight_sum == 0.0 {
        return None;
    }
    Some(to_deg(sin_sum.atan2(cos_sum)).rem_euclid(360.0))
}

/// Smallest signed angular difference `b - a`, in `(-180, 180]` degrees.
pub fn heading_delta_deg(a: f64, b: f64) -> f64 {
    let mut delta = (b - a) % 360.0;
    if delta > 180.0 {
        delta -= 360.0;
    } else if delta <= -180.0 {
        delta += 360.0;
    }
    delta
}
