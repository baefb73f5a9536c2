//! Exploration grid over the operational area.
//!
//! The grid partitions the area's bounding box into cells and tracks which
//! valid (in-area) cells have been visited during the current exploration
//! cycle. Construction is resumable: each call to [`ExplorationGrid::step`]
//! performs a bounded amount of work so a single control tick never stalls.

use crate::area::AreaManager;
use crate::config::GridConfig;
use crate::geo::{self, Location};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Resumable construction state.
#[derive(Clone, Debug, PartialEq, Eq)]
enum BuildPhase {
    /// Waiting for the first step
    Pending,
    /// Allocating visit-count records, `next` cells done
    Allocating { next: usize },
    /// Testing cell centers for containment, `next` cells done
    Validating { next: usize },
    /// Construction complete
    Ready,
}

/// Incrementally built cell grid with visited/unvisited tracking.
pub struct ExplorationGrid {
    config: GridConfig,
    phase: BuildPhase,
    rows: usize,
    cols: usize,
    /// Cell extents in degrees
    lat_step: f64,
    lon_step: f64,
    /// Southwest corner of the grid
    origin: Location,
    /// Derived cell edge length in meters
    cell_size_m: f64,
    /// Per-cell visit counts for the current cycle
    visit_counts: Vec<u16>,
    /// Indices of cells whose center lies inside the area
    valid_cells: Vec<usize>,
    /// Valid cells not yet visited this cycle
    unvisited: Vec<usize>,
    /// One-shot flag set when a new exploration cycle begins
    force_explore: bool,
    /// Completed exploration cycles
    cycles: u32,
    rng: StdRng,
}

impl ExplorationGrid {
    pub fn new(config: GridConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic grid for tests.
    pub fn with_seed(config: GridConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: GridConfig, rng: StdRng) -> Self {
        Self {
            config,
            phase: BuildPhase::Pending,
            rows: 0,
            cols: 0,
            lat_step: 0.0,
            lon_step: 0.0,
            origin: Location::new(0.0, 0.0),
            cell_size_m: 0.0,
            visit_counts: Vec::new(),
            valid_cells: Vec::new(),
            unvisited: Vec::new(),
            force_explore: false,
            cycles: 0,
            rng,
        }
    }

    /// Discard all cells and restart construction from the beginning.
    ///
    /// Called whenever the area configuration changes or the area is
    /// re-centered; the grid is always rebuilt from scratch, never patched.
    pub fn rebuild(&mut self) {
        self.phase = BuildPhase::Pending;
        self.visit_counts.clear();
        self.valid_cells.clear();
        self.unvisited.clear();
        self.force_explore = false;
        self.cycles = 0;
        debug!("Exploration grid scheduled for rebuild");
    }

    /// Advance construction by one bounded step. Returns readiness.
    pub fn step(&mut self, area: &AreaManager) -> bool {
        let budget = self.config.cells_per_step;
        match self.phase {
            BuildPhase::Pending => {
                self.compute_dimensions(area);
                self.phase = BuildPhase::Allocating { next: 0 };
            }
            BuildPhase::Allocating { next } => {
                let total = self.rows * self.cols;
                let end = (next + budget).min(total);
                self.visit_counts.resize(end, 0);
                self.phase = if end == total {
                    BuildPhase::Validating { next: 0 }
                } else {
                    BuildPhase::Allocating { next: end }
                };
            }
            BuildPhase::Validating { next } => {
                let total = self.rows * self.cols;
                let end = (next + budget).min(total);
                for idx in next..end {
                    if area.contains(self.cell_center(idx)) {
                        self.valid_cells.push(idx);
                    }
                }
                if end == total {
                    self.unvisited = self.valid_cells.clone();
                    self.phase = BuildPhase::Ready;
                    info!(
                        "Exploration grid ready: {}x{} cells ({:.0}m), {} valid",
                        self.rows,
                        self.cols,
                        self.cell_size_m,
                        self.valid_cells.len()
                    );
                } else {
                    self.phase = BuildPhase::Validating { next: end };
                }
            }
            BuildPhase::Ready => {}
        }
        self.is_ready()
    }

    /// Derive rows/cols and cell size from the area bounding box.
    fn compute_dimensions(&mut self, area: &AreaManager) {
        let b = area.bounds();
        let sw = Location::new(b.min_lat, b.min_lon);
        let width_m = geo::distance_m(sw, Location::new(b.min_lat, b.max_lon));
        let height_m = geo::distance_m(sw, Location::new(b.max_lat, b.min_lon));

        let area_m2 = (width_m * height_m).max(1.0);
        let cell = (area_m2 / self.config.max_cells as f64)
            .sqrt()
            .max(self.config.min_cell_size_m);

        self.cols = ((width_m / cell).floor() as usize).max(1);
        self.rows = ((height_m / cell).floor() as usize).max(1);
        self.lat_step = (b.max_lat - b.min_lat) / self.rows as f64;
        self.lon_step = (b.max_lon - b.min_lon) / self.cols as f64;
        self.origin = sw;
        self.cell_size_m = cell;

        debug!(
            "Grid dimensions: {}x{} over {:.0}m x {:.0}m, cell {:.0}m",
            self.rows, self.cols, width_m, height_m, cell
        );
    }

    pub fn is_ready(&self) -> bool {
        self.phase == BuildPhase::Ready
    }

    /// Center of cell `idx`.
    fn cell_center(&self, idx: usize) -> Location {
        let row = idx / self.cols;
        let col = idx % self.cols;
        Location::new(
            self.origin.lat + (row as f64 + 0.5) * self.lat_step,
            self.origin.lon + (col as f64 + 0.5) * self.lon_step,
        )
    }

    /// Draw a random unvisited cell and return a jittered point inside it.
    ///
    /// When the unvisited set is exhausted a new exploration cycle begins:
    /// every visit count resets, the unvisited set is repopulated from the
    /// valid set, and the one-shot force-exploration flag is raised.
    pub fn select_unvisited(&mut self) -> Option<Location> {
        if !self.is_ready() || self.valid_cells.is_empty() {
            return None;
        }

        if self.unvisited.is_empty() {
            self.begin_cycle();
        }

        let pick = self.rng.random_range(0..self.unvisited.len());
        let idx = self.unvisited.swap_remove(pick);
        self.visit_counts[idx] = self.visit_counts[idx].saturating_add(1);

        let row = idx / self.cols;
        let col = idx % self.cols;
        let lat =
            self.origin.lat + (row as f64 + self.rng.random::<f64>()) * self.lat_step;
        let lon =
            self.origin.lon + (col as f64 + self.rng.random::<f64>()) * self.lon_step;
        Some(Location::new(lat, lon))
    }

    /// Start a new exploration cycle.
    fn begin_cycle(&mut self) {
        self.visit_counts.fill(0);
        self.unvisited = self.valid_cells.clone();
        self.force_explore = true;
        self.cycles += 1;
        info!(
            "Exploration cycle {} complete, visit state reset ({} cells)",
            self.cycles,
            self.valid_cells.len()
        );
    }

    /// Consume the one-shot force-exploration flag.
    pub fn take_force_explore(&mut self) -> bool {
        std::mem::take(&mut self.force_explore)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cell_size_m(&self) -> f64 {
        self.cell_size_m
    }

    pub fn valid_count(&self) -> usize {
        self.valid_cells.len()
    }

    pub fn unvisited_count(&self) -> usize {
        self.unvisited.len()
    }

    #[cfg(test)]
    fn unvisited_is_subset_of_valid(&self) -> bool {
        self.unvisited.iter().all(|i| self.valid_cells.contains(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_grid(radius_m: f64) -> (ExplorationGrid, AreaManager) {
        let area = AreaManager::circle(Location::new(47.0, 8.0), radius_m);
        let mut grid = ExplorationGrid::with_seed(GridConfig::default(), 7);
        while !grid.step(&area) {}
        (grid, area)
    }

    #[test]
    fn test_build_is_chunked() {
        let area = AreaManager::circle(Location::new(47.0, 8.0), 500.0);
        let mut grid = ExplorationGrid::with_seed(GridConfig::default(), 7);

        // First step only sizes the grid; several more are needed
        assert!(!grid.step(&area));
        assert!(!grid.is_ready());
        let mut steps = 1;
        while !grid.step(&area) {
            steps += 1;
            assert!(steps < 1000, "grid construction did not terminate");
        }
        assert!(steps > 2, "construction finished in one call");
    }

    #[test]
    fn test_cell_sizing_respects_limits() {
        // Radius 500m, max 128 cells, min cell 30m
        let (grid, _) = ready_grid(500.0);
        assert!(grid.rows() * grid.cols() <= 128);
        assert!(grid.cell_size_m() >= 30.0);
    }

    #[test]
    fn test_valid_cells_inside_area() {
        let (mut grid, area) = ready_grid(500.0);
        // Corner cells of the bounding square lie outside the circle
        assert!(grid.valid_count() < grid.rows() * grid.cols());

        for _ in 0..grid.valid_count() {
            let p = grid.select_unvisited().unwrap();
            // Jittered point is inside its (valid) cell; the cell center is in
            // the area, so the point is within one cell diagonal of the area
            assert!(area.bounds().contains(p));
        }
    }

    #[test]
    fn test_unvisited_subset_and_cycle_reset() {
        let (mut grid, _) = ready_grid(400.0);
        let valid = grid.valid_count();
        assert_eq!(grid.unvisited_count(), valid);

        // Drain the whole cycle
        for _ in 0..valid {
            assert!(grid.select_unvisited().is_some());
            assert!(grid.unvisited_is_subset_of_valid());
        }
        assert_eq!(grid.unvisited_count(), 0);
        assert!(!grid.take_force_explore());

        // Next access starts a fresh cycle: repopulated and counts reset
        assert!(grid.select_unvisited().is_some());
        assert_eq!(grid.unvisited_count(), valid - 1);
        assert!(grid.take_force_explore());
        assert!(!grid.take_force_explore(), "flag must be one-shot");
        assert_eq!(grid.visit_counts.iter().map(|&c| c as u32).sum::<u32>(), 1);
    }

    #[test]
    fn test_rebuild_clears_state() {
        let (mut grid, area) = ready_grid(500.0);
        grid.select_unvisited();
        grid.rebuild();
        assert!(!grid.is_ready());
        assert_eq!(grid.valid_count(), 0);
        assert!(grid.select_unvisited().is_none());

        while !grid.step(&area) {}
        assert!(grid.select_unvisited().is_some());
    }

    #[test]
    fn test_small_area_has_at_least_one_cell() {
        let (grid, _) = ready_grid(100.0);
        assert!(grid.rows() >= 1 && grid.cols() >= 1);
        assert!(grid.valid_count() >= 1);
    }
}
