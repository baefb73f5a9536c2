//! Great-circle geometry helpers.
//!
//! All positions are WGS-84 degrees; distances are meters. Bearings and
//! headings are compass degrees (0 = north, clockwise positive).

/// Mean earth radius (meters)
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A geographic position in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Great-circle (haversine) distance in meters.
pub fn distance_m(a: Location, b: Location) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial bearing from `a` to `b` in degrees [0, 360).
pub fn bearing_deg(a: Location, b: Location) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Project a point `distance_m` meters from `origin` along `bearing` degrees.
pub fn destination(origin: Location, bearing: f64, distance: f64) -> Location {
    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lon.to_radians();
    let brg = bearing.to_radians();
    let ang = distance / EARTH_RADIUS_M;

    let lat2 = (lat1.sin() * ang.cos() + lat1.cos() * ang.sin() * brg.cos()).asin();
    let lon2 = lon1
        + (brg.sin() * ang.sin() * lat1.cos()).atan2(ang.cos() - lat1.sin() * lat2.sin());

    Location::new(lat2.to_degrees(), lon2.to_degrees())
}

/// Ray-casting point-in-polygon test.
///
/// Handles non-convex loops. Each vertex is paired with the previous one
/// (wrapping to the last vertex for the first), so the caller may pass either
/// an open or an auto-closed vertex list.
pub fn point_in_polygon(point: Location, vertices: &[Location]) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let vi = vertices[i];
        let vj = vertices[j];
        if (vi.lat > point.lat) != (vj.lat > point.lat) {
            let cross =
                (vj.lon - vi.lon) * (point.lat - vi.lat) / (vj.lat - vi.lat) + vi.lon;
            if point.lon < cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Normalize a heading difference into (-180, 180].
#[inline]
pub fn normalize_heading(deg: f32) -> f32 {
    let mut d = deg % 360.0;
    if d > 180.0 {
        d -= 360.0;
    } else if d <= -180.0 {
        d += 360.0;
    }
    d
}
