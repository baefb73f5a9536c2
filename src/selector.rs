//! Waypoint selection: the energy-gated decision core.
//!
//! CRITICAL/LOW energy picks the strongest remembered hotspot outright.
//! NORMAL energy weighs thermal memory against exploration with a dynamic
//! probability driven by recent soaring success, then falls back to the
//! exploration grid and finally to a single random in-area point. No path
//! may ever return a point outside the operational area.

use crate::area::AreaManager;
use crate::energy::EnergyState;
use crate::geo::{self, Location};
use crate::grid::ExplorationGrid;
use crate::inputs::Vec2;
use crate::thermal::{Hotspot, ThermalMemory};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Radius of the randomized point generated around a hotspot (meters).
const HOTSPOT_TARGET_RADIUS_M: f64 = 250.0;
/// Trailing window for counting successful lift entries.
const ENTRY_WINDOW_MS: u64 = 15 * 60 * 1000;
/// Dynamic memory-use probability band.
const MEMORY_PROB_MIN: f32 = 0.15;
const MEMORY_PROB_MAX: f32 = 0.85;
/// Hotspot age below which drift prediction is skipped (seconds).
const DRIFT_MIN_AGE_S: f32 = 10.0;

/// Which strategy produced a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSource {
    /// Randomized point near a remembered hotspot
    ThermalMemory,
    /// Jittered point in an unvisited grid cell
    Exploration,
    /// Degraded single random point inside the area
    RandomFallback,
    /// Temporary upwind anti-stall redirect
    Reposition,
}

/// The single active navigation target.
#[derive(Clone, Copy, Debug)]
pub struct NavigationTarget {
    pub location: Location,
    pub source: TargetSource,
    /// Creation time, host milliseconds
    pub created_ms: u64,
}

/// Chooses the next target from energy state, thermal memory and the grid.
pub struct WaypointSelector {
    rng: StdRng,
    /// Timestamps of recent lift-mode entries (trailing window)
    recent_entries: VecDeque<u64>,
    /// Capture stamp of the most recently targeted hotspot
    last_hotspot_stamp: Option<u64>,
}

impl WaypointSelector {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic selector for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            recent_entries: VecDeque::new(),
            last_hotspot_stamp: None,
        }
    }

    /// Record a successful lift-mode entry for the trailing success window.
    pub fn record_lift_entry(&mut self, now_ms: u64) {
        self.recent_entries.push_back(now_ms);
    }

    /// Number of lift entries inside the trailing window, capped at 3.
    fn recent_entry_count(&mut self, now_ms: u64) -> u32 {
        while let Some(&front) = self.recent_entries.front() {
            if now_ms.saturating_sub(front) > ENTRY_WINDOW_MS {
                self.recent_entries.pop_front();
            } else {
                break;
            }
        }
        (self.recent_entries.len() as u32).min(3)
    }

    /// Select the next navigation target.
    pub fn select(
        &mut self,
        now_ms: u64,
        energy: EnergyState,
        memory: &ThermalMemory,
        grid: &mut ExplorationGrid,
        area: &AreaManager,
        wind: Vec2,
    ) -> Option<NavigationTarget> {
        // Energy-gated deterministic path: head for the strongest lift
        if energy != EnergyState::Normal {
            if let Some(h) = memory.strongest(now_ms) {
                let stamp = h.timestamp_ms;
                let location = h.location;
                if let Some(point) = self.randomized_near(location, area) {
                    info!(
                        "Low-energy target near strongest hotspot (avg {:.2} m/s)",
                        h.avg_strength
                    );
                    self.last_hotspot_stamp = Some(stamp);
                    return Some(NavigationTarget {
                        location: point,
                        source: TargetSource::ThermalMemory,
                        created_ms: now_ms,
                    });
                }
            }
            // No usable hotspot: fall through to the standard path
        }

        // Dynamic memory probability from recent soaring success
        let force_explore = grid.take_force_explore();
        let count = self.recent_entry_count(now_ms);
        let memory_prob =
            MEMORY_PROB_MIN + (MEMORY_PROB_MAX - MEMORY_PROB_MIN) * count as f32 / 3.0;

        if !force_explore
            && memory.active_count(now_ms) > 0
            && self.rng.random::<f32>() < memory_prob
        {
            if let Some((stamp, point)) = self.pick_from_memory(now_ms, memory, wind) {
                if let Some(target) = self.randomized_near(point, area) {
                    debug!("Memory target chosen (p={:.2})", memory_prob);
                    self.last_hotspot_stamp = Some(stamp);
                    return Some(NavigationTarget {
                        location: target,
                        source: TargetSource::ThermalMemory,
                        created_ms: now_ms,
                    });
                }
            }
        }

        // Exploration grid
        if let Some(point) = grid.select_unvisited() {
            if area.contains(point) {
                debug!(
                    "Exploration target, {} unvisited cells left",
                    grid.unvisited_count()
                );
                return Some(NavigationTarget {
                    location: point,
                    source: TargetSource::Exploration,
                    created_ms: now_ms,
                });
            }
            // Jittered point landed outside the area: discard and degrade
        }

        // One-shot random point inside the area, no retry loop
        let b = area.bounds();
        let lat = b.min_lat + self.rng.random::<f64>() * (b.max_lat - b.min_lat);
        let lon = b.min_lon + self.rng.random::<f64>() * (b.max_lon - b.min_lon);
        let point = Location::new(lat, lon);
        if area.contains(point) {
            debug!("Random fallback target");
            Some(NavigationTarget {
                location: point,
                source: TargetSource::RandomFallback,
                created_ms: now_ms,
            })
        } else {
            None
        }
    }

    /// 2-draw tournament over usable hotspots, with downwind drift prediction.
    fn pick_from_memory(
        &mut self,
        now_ms: u64,
        memory: &ThermalMemory,
        wind: Vec2,
    ) -> Option<(u64, Location)> {
        let all: Vec<&Hotspot> = memory.active(now_ms).collect();
        // Exclude the most recently targeted hotspot unless it is the only one
        let candidates: Vec<&Hotspot> = if all.len() > 1 {
            all.iter()
                .copied()
                .filter(|h| Some(h.timestamp_ms) != self.last_hotspot_stamp)
                .collect()
        } else {
            all
        };

        let chosen = match candidates.len() {
            0 => return None,
            1 => candidates[0],
            n => {
                let a = candidates[self.rng.random_range(0..n)];
                let b = candidates[self.rng.random_range(0..n)];
                if a.avg_strength >= b.avg_strength { a } else { b }
            }
        };

        let age_s = chosen.age_s(now_ms);
        let location = if wind.speed() > 1.0 && age_s > DRIFT_MIN_AGE_S {
            // Predict where the thermal has drifted since capture
            let factor = (age_s / 600.0).min(1.5);
            let drift_m = (wind.speed() * age_s * factor) as f64;
            debug!(
                "Drift prediction: {:.0}m downwind over {:.0}s",
                drift_m, age_s
            );
            geo::destination(chosen.location, wind.bearing_deg(), drift_m)
        } else {
            chosen.location
        };

        Some((chosen.timestamp_ms, location))
    }

    /// Randomized point within a fixed radius of `center`, biased area-uniform
    /// (radial draw uses sqrt of a uniform variate). A draw outside the
    /// operational area is rejected; the caller falls through.
    fn randomized_near(&mut self, center: Location, area: &AreaManager) -> Option<Location> {
        let r = self.rng.random::<f64>().sqrt() * HOTSPOT_TARGET_RADIUS_M;
        let bearing = self.rng.random::<f64>() * 360.0;
        let point = geo::destination(center, bearing, r);
        if area.contains(point) { Some(point) } else { None }
    }
}

impl Default for WaypointSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridConfig, ThermalConfig};
    use crate::thermal::Consistency;

    fn hotspot(avg: f32, location: Location, timestamp_ms: u64) -> Hotspot {
        Hotspot {
            location,
            timestamp_ms,
            avg_strength: avg,
            max_strength: avg * 1.2,
            consistency: Consistency::Consistent,
            duration_s: 60.0,
            wind: Vec2::default(),
        }
    }

    fn setup(radius_m: f64) -> (AreaManager, ExplorationGrid, ThermalMemory) {
        let area = AreaManager::circle(Location::new(47.0, 8.0), radius_m);
        let mut grid = ExplorationGrid::with_seed(GridConfig::default(), 3);
        while !grid.step(&area) {}
        let memory = ThermalMemory::new(&ThermalConfig::default());
        (area, grid, memory)
    }

    #[test]
    fn test_critical_targets_strongest_hotspot() {
        let (area, mut grid, mut memory) = setup(500.0);
        let spot = geo::destination(area.center(), 90.0, 100.0);
        memory.insert(hotspot(2.0, spot, 0));

        let mut selector = WaypointSelector::with_seed(11);
        // Deterministic across many draws: always thermal memory, near the spot
        for _ in 0..50 {
            let t = selector
                .select(
                    1000,
                    EnergyState::Critical,
                    &memory,
                    &mut grid,
                    &area,
                    Vec2::default(),
                )
                .unwrap();
            assert_eq!(t.source, TargetSource::ThermalMemory);
            assert!(geo::distance_m(t.location, spot) <= 251.0);
            assert!(area.contains(t.location));
        }
    }

    #[test]
    fn test_critical_without_memory_falls_back() {
        let (area, mut grid, memory) = setup(500.0);
        let mut selector = WaypointSelector::with_seed(11);
        let t = selector
            .select(
                1000,
                EnergyState::Critical,
                &memory,
                &mut grid,
                &area,
                Vec2::default(),
            )
            .unwrap();
        assert_eq!(t.source, TargetSource::Exploration);
    }

    #[test]
    fn test_targets_always_in_area() {
        let (area, mut grid, mut memory) = setup(500.0);
        memory.insert(hotspot(1.5, geo::destination(area.center(), 45.0, 300.0), 0));
        let mut selector = WaypointSelector::with_seed(5);
        selector.record_lift_entry(0);
        selector.record_lift_entry(0);

        for i in 0..200 {
            if let Some(t) = selector.select(
                1000 + i,
                EnergyState::Normal,
                &memory,
                &mut grid,
                &area,
                Vec2::new(2.0, 1.0),
            ) {
                assert!(area.contains(t.location), "{:?} out of area", t.source);
            }
        }
    }

    #[test]
    fn test_force_explore_skips_memory() {
        let (area, mut grid, mut memory) = setup(500.0);
        memory.insert(hotspot(3.0, area.center(), 0));

        // Drain a full cycle so the next selection raises the one-shot flag
        for _ in 0..grid.valid_count() {
            grid.select_unvisited();
        }
        grid.select_unvisited();
        assert!(grid.take_force_explore());

        // Raise it again and run through the selector: memory must be skipped
        for _ in 0..grid.unvisited_count() {
            grid.select_unvisited();
        }
        grid.select_unvisited();

        let mut selector = WaypointSelector::with_seed(2);
        for _ in 0..10 {
            selector.record_lift_entry(900); // push probability to max
        }
        let t = selector
            .select(1000, EnergyState::Normal, &memory, &mut grid, &area, Vec2::default())
            .unwrap();
        assert_eq!(t.source, TargetSource::Exploration);
    }

    #[test]
    fn test_memory_probability_band() {
        let mut selector = WaypointSelector::with_seed(1);
        assert_eq!(selector.recent_entry_count(0), 0);

        for _ in 0..5 {
            selector.record_lift_entry(1000);
        }
        // Capped at 3
        assert_eq!(selector.recent_entry_count(2000), 3);

        // Entries age out of the 15-minute window
        assert_eq!(selector.recent_entry_count(1000 + ENTRY_WINDOW_MS + 1), 0);
    }

    #[test]
    fn test_tournament_excludes_last_target() {
        let (area, mut grid, mut memory) = setup(1500.0);
        let spot_a = geo::destination(area.center(), 0.0, 400.0);
        let spot_b = geo::destination(area.center(), 180.0, 400.0);
        memory.insert(hotspot(2.0, spot_a, 100));
        memory.insert(hotspot(1.0, spot_b, 200));

        let mut selector = WaypointSelector::with_seed(9);
        selector.last_hotspot_stamp = Some(100);

        // With the stronger hotspot excluded, memory picks must come from B
        for _ in 0..20 {
            if let Some((stamp, _)) =
                selector.pick_from_memory(1000, &memory, Vec2::default())
            {
                assert_eq!(stamp, 200);
            }
        }
    }

    #[test]
    fn test_single_hotspot_reusable() {
        let (_, _, mut memory) = setup(500.0);
        memory.insert(hotspot(2.0, Location::new(47.0, 8.0), 100));

        let mut selector = WaypointSelector::with_seed(9);
        selector.last_hotspot_stamp = Some(100);
        // Only one candidate: the exclusion is waived
        let (stamp, _) = selector
            .pick_from_memory(1000, &memory, Vec2::default())
            .unwrap();
        assert_eq!(stamp, 100);
    }

    #[test]
    fn test_drift_prediction_moves_downwind() {
        let (_, _, mut memory) = setup(500.0);
        let origin = Location::new(47.0, 8.0);
        memory.insert(hotspot(2.0, origin, 0));

        let mut selector = WaypointSelector::with_seed(4);
        // Wind 4 m/s north, hotspot age 60s: factor 0.1, drift 24m north
        let (_, predicted) = selector
            .pick_from_memory(60_000, &memory, Vec2::new(4.0, 0.0))
            .unwrap();
        assert!(predicted.lat > origin.lat);
        let d = geo::distance_m(origin, predicted);
        assert!((d - 24.0).abs() < 1.0, "drift {}m", d);
    }

    #[test]
    fn test_fresh_hotspot_not_drift_predicted() {
        let (_, _, mut memory) = setup(500.0);
        let origin = Location::new(47.0, 8.0);
        memory.insert(hotspot(2.0, origin, 0));

        let mut selector = WaypointSelector::with_seed(4);
        let (_, predicted) = selector
            .pick_from_memory(5_000, &memory, Vec2::new(4.0, 0.0))
            .unwrap();
        assert_eq!(predicted, origin);
    }
}
