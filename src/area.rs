//! Operational area management.
//!
//! Resolves the configured region (circular radius or polygon boundary file)
//! into a bounding box and a containment predicate. A rejected polygon file
//! reverts the area to radius mode with a safe default distance.

use crate::config::AreaConfig;
use crate::error::{Result, SoarError};
use crate::geo::{self, Location};
use std::path::Path;
use tracing::{error, info};

/// Safe radius applied when the configured region is unusable (meters).
const FALLBACK_RADIUS_M: f64 = 500.0;

/// Bounding box of the operational area, degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AreaBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl AreaBounds {
    /// Coarse containment pre-check.
    pub fn contains(&self, p: Location) -> bool {
        p.lat >= self.min_lat
            && p.lat <= self.max_lat
            && p.lon >= self.min_lon
            && p.lon <= self.max_lon
    }
}

/// Region shape.
#[derive(Clone, Debug)]
enum AreaShape {
    Circle { radius_m: f64 },
    Polygon { vertices: Vec<Location> },
}

/// Resolves the operational region into bounds and a containment test.
#[derive(Clone, Debug)]
pub struct AreaManager {
    center: Location,
    shape: AreaShape,
    bounds: AreaBounds,
}

impl AreaManager {
    /// Circular area around `center`.
    pub fn circle(center: Location, radius_m: f64) -> Self {
        Self {
            center,
            bounds: circle_bounds(center, radius_m),
            shape: AreaShape::Circle { radius_m },
        }
    }

    /// Polygon area. Requires at least 3 distinct vertices.
    pub fn polygon(center: Location, mut vertices: Vec<Location>) -> Result<Self> {
        // Drop the closing vertex if the file already closed the loop
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        let mut distinct = vertices.clone();
        distinct.dedup_by(|a, b| a == b);
        if distinct.len() < 3 {
            return Err(SoarError::Polygon(format!(
                "polygon needs at least 3 distinct points, got {}",
                distinct.len()
            )));
        }

        let mut bounds = AreaBounds {
            min_lat: f64::MAX,
            max_lat: f64::MIN,
            min_lon: f64::MAX,
            max_lon: f64::MIN,
        };
        for v in &vertices {
            bounds.min_lat = bounds.min_lat.min(v.lat);
            bounds.max_lat = bounds.max_lat.max(v.lat);
            bounds.min_lon = bounds.min_lon.min(v.lon);
            bounds.max_lon = bounds.max_lon.max(v.lon);
        }

        Ok(Self {
            center,
            shape: AreaShape::Polygon { vertices },
            bounds,
        })
    }

    /// Resolve the configured region around `center`.
    ///
    /// A missing or malformed polygon file is logged and the area reverts to
    /// radius mode; an unusable radius is forced to the safe default.
    pub fn resolve(center: Location, config: &AreaConfig) -> Self {
        let radius = if config.radius_m.is_finite() && config.radius_m >= 100.0 {
            config.radius_m
        } else {
            error!(
                "Area radius {:.0}m unusable, forcing {:.0}m",
                config.radius_m, FALLBACK_RADIUS_M
            );
            FALLBACK_RADIUS_M
        };

        if let Some(path) = &config.polygon_path {
            match load_polygon(Path::new(path)).and_then(|v| Self::polygon(center, v)) {
                Ok(area) => {
                    info!(
                        "Polygon area loaded from {} ({} vertices)",
                        path,
                        match &area.shape {
                            AreaShape::Polygon { vertices } => vertices.len(),
                            _ => 0,
                        }
                    );
                    return area;
                }
                Err(e) => {
                    error!("Polygon file {} rejected: {}, reverting to radius mode", path, e);
                }
            }
        }

        Self::circle(center, radius)
    }

    /// Containment test against the region.
    pub fn contains(&self, p: Location) -> bool {
        match &self.shape {
            AreaShape::Circle { radius_m } => geo::distance_m(self.center, p) <= *radius_m,
            AreaShape::Polygon { vertices } => {
                // Pre-check against the polygon's own bounding box
                self.bounds.contains(p) && geo::point_in_polygon(p, vertices)
            }
        }
    }

    pub fn bounds(&self) -> &AreaBounds {
        &self.bounds
    }

    pub fn center(&self) -> Location {
        self.center
    }

    pub fn is_polygon(&self) -> bool {
        matches!(self.shape, AreaShape::Polygon { .. })
    }

    /// Move the region to a new center.
    ///
    /// A polygon is translated as a rigid shape; a circle just moves.
    pub fn recenter(&mut self, new_center: Location) {
        let dlat = new_center.lat - self.center.lat;
        let dlon = new_center.lon - self.center.lon;
        self.center = new_center;
        match &mut self.shape {
            AreaShape::Circle { radius_m } => {
                self.bounds = circle_bounds(new_center, *radius_m);
            }
            AreaShape::Polygon { vertices } => {
                for v in vertices.iter_mut() {
                    v.lat += dlat;
                    v.lon += dlon;
                }
                self.bounds = AreaBounds {
                    min_lat: self.bounds.min_lat + dlat,
                    max_lat: self.bounds.max_lat + dlat,
                    min_lon: self.bounds.min_lon + dlon,
                    max_lon: self.bounds.max_lon + dlon,
                };
            }
        }
        info!(
            "Area re-centered to ({:.5}, {:.5})",
            new_center.lat, new_center.lon
        );
    }
}

/// Bounding square enclosing a circle of `radius_m` around `center`.
///
/// Built from the four cardinal projections with a 0.5% margin; a diagonal
/// projection underestimates the latitude extent away from the equator and
/// leaves points on the circle itself just outside the box.
fn circle_bounds(center: Location, radius_m: f64) -> AreaBounds {
    let r = radius_m * 1.005;
    let n = geo::destination(center, 0.0, r);
    let e = geo::destination(center, 90.0, r);
    let s = geo::destination(center, 180.0, r);
    let w = geo::destination(center, 270.0, r);
    AreaBounds {
        min_lat: s.lat,
        max_lat: n.lat,
        min_lon: w.lon,
        max_lon: e.lon,
    }
}

/// Load polygon vertices from a plain-text file.
///
/// One `lat lon` pair per line, whitespace separated. Lines starting with `#`
/// and blank lines are ignored.
pub fn load_polygon(path: &Path) -> Result<Vec<Location>> {
    let content = std::fs::read_to_string(path)?;
    let mut vertices = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let lat = parts.next().and_then(|s| s.parse::<f64>().ok());
        let lon = parts.next().and_then(|s| s.parse::<f64>().ok());
        match (lat, lon) {
            (Some(lat), Some(lon)) if lat.abs() <= 90.0 && lon.abs() <= 180.0 => {
                vertices.push(Location::new(lat, lon));
            }
            _ => {
                return Err(SoarError::Polygon(format!(
                    "malformed vertex at line {}: '{}'",
                    lineno + 1,
                    line
                )));
            }
        }
    }

    Ok(vertices)
}
