//! Top-level soaring controller state machine and tick scheduling.
//!
//! One owned context instance holds every component; the host scheduler
//! invokes [`SoarController::tick`] at a fixed cadence and applies the
//! returned actuator command and reschedule interval. Nothing here blocks:
//! all waiting is expressed as timestamp comparisons against the host clock.

use crate::area::AreaManager;
use crate::config::SoarConfig;
use crate::energy::EnergyMonitor;
use crate::error::Result;
use crate::geo::{self, Location};
use crate::grid::ExplorationGrid;
use crate::inputs::{FlightMode, TickInput, Vec2, WindCache};
use crate::nav::{self, ProgressAction, ProgressMonitor, RollController};
use crate::pilot::PilotMonitor;
use crate::selector::{NavigationTarget, TargetSource, WaypointSelector};
use crate::thermal::{ThermalMemory, ThermalSampler};
use tracing::{debug, error, info, warn};

/// Reschedule interval while idle or disabled (ms).
const IDLE_INTERVAL_MS: u64 = 1000;
/// Reschedule interval in the error state (ms).
const ERROR_INTERVAL_MS: u64 = 5000;
/// Reduced-rate interval after a caught runtime fault (ms).
const FAULT_INTERVAL_MS: u64 = 1000;
/// Consecutive fix losses tolerated before escalating to error.
const MAX_FIX_FAILURES: u32 = 10;
/// Wind estimate cache TTL (ms).
const WIND_TTL_MS: u64 = 2000;

/// Overall operating state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    /// Preconditions not met; standing by
    Idle,
    /// Autonomous target tracking
    Navigating,
    /// Pilot has the sticks
    PilotOverride,
    /// Host is circling lift; sampling the thermal
    ThermalPause,
    /// Configuration or sensor failure
    Error,
}

impl ControllerState {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerState::Idle => "Idle",
            ControllerState::Navigating => "Navigating",
            ControllerState::PilotOverride => "PilotOverride",
            ControllerState::ThermalPause => "ThermalPause",
            ControllerState::Error => "Error",
        }
    }
}

/// Result of one control tick.
#[derive(Clone, Copy, Debug)]
pub struct TickOutput {
    /// Actuator override to write, if any (roll channel pulse width)
    pub command: Option<u16>,
    /// Requested delay before the next tick (ms)
    pub next_tick_ms: u64,
    pub state: ControllerState,
}

/// The thermal-seeking navigation controller.
pub struct SoarController {
    config: SoarConfig,
    area: AreaManager,
    grid: ExplorationGrid,
    memory: ThermalMemory,
    sampler: Option<ThermalSampler>,
    energy: EnergyMonitor,
    selector: WaypointSelector,
    roll: RollController,
    progress: ProgressMonitor,
    pilot: PilotMonitor,
    wind_cache: WindCache,
    state: ControllerState,
    target: Option<NavigationTarget>,
    /// Original target saved across an anti-stall reposition
    saved_target: Option<NavigationTarget>,
    fix_failures: u32,
    config_valid: bool,
}

impl SoarController {
    /// Build the controller around the home position.
    pub fn new(config: SoarConfig, home: Location) -> Result<Self> {
        config.validate()?;
        let area = AreaManager::resolve(home, &config.area);
        Ok(Self {
            grid: ExplorationGrid::new(config.grid.clone()),
            memory: ThermalMemory::new(&config.thermal),
            sampler: None,
            energy: EnergyMonitor::new(config.energy.clone()),
            selector: WaypointSelector::new(),
            roll: RollController::new(&config.nav, config.loop_period_ms),
            progress: ProgressMonitor::new(&config.nav),
            pilot: PilotMonitor::new(config.pilot.clone()),
            wind_cache: WindCache::new(WIND_TTL_MS),
            state: ControllerState::Idle,
            target: None,
            saved_target: None,
            fix_failures: 0,
            config_valid: true,
            area,
            config,
        })
    }

    /// Deterministic controller for tests.
    #[cfg(test)]
    pub(crate) fn with_seed(config: SoarConfig, home: Location, seed: u64) -> Result<Self> {
        let mut c = Self::new(config, home)?;
        c.grid = ExplorationGrid::with_seed(c.config.grid.clone(), seed);
        c.selector = WaypointSelector::with_seed(seed);
        Ok(c)
    }

    /// Apply a changed configuration.
    ///
    /// An invalid configuration disables the controller (ERROR) until a valid
    /// one arrives; a valid one rebuilds the area and grid from scratch.
    pub fn apply_config(&mut self, config: SoarConfig) {
        match config.validate() {
            Ok(()) => {
                info!("Configuration applied, rebuilding area and grid");
                self.area = AreaManager::resolve(self.area.center(), &config.area);
                self.grid = ExplorationGrid::new(config.grid.clone());
                self.memory.reconfigure(&config.thermal);
                self.energy = EnergyMonitor::new(config.energy.clone());
                self.roll = RollController::new(&config.nav, config.loop_period_ms);
                self.progress = ProgressMonitor::new(&config.nav);
                self.pilot = PilotMonitor::new(config.pilot.clone());
                self.clear_target();
                self.config_valid = true;
                self.config = config;
                if self.state == ControllerState::Error {
                    self.state = ControllerState::Idle;
                }
            }
            Err(e) => {
                error!("Configuration rejected, controller disabled: {}", e);
                self.config_valid = false;
                self.clear_target();
                self.state = ControllerState::Error;
            }
        }
    }

    /// Run one control tick.
    ///
    /// The body is wrapped in a fault guard: an unexpected panic in the
    /// decision or control logic is logged at high severity and the loop is
    /// rescheduled at a reduced rate instead of taking down the host.
    pub fn tick(&mut self, input: &TickInput) -> TickOutput {
        let guarded =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.tick_inner(input)));
        match guarded {
            Ok(output) => output,
            Err(cause) => {
                let msg = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Runtime fault in control tick: {}; reduced-rate reschedule", msg);
                TickOutput {
                    command: None,
                    next_tick_ms: FAULT_INTERVAL_MS,
                    state: self.state,
                }
            }
        }
    }

    fn tick_inner(&mut self, input: &TickInput) -> TickOutput {
        let now = input.now_ms;

        if !self.config_valid {
            // Disabled until a valid configuration arrives; slow recheck
            self.state = ControllerState::Error;
            return self.output(None);
        }

        // Precondition loss collapses to idle in the same tick, even when the
        // position fix is gone on that same tick
        let preconditions = self.config.enabled
            && input.status.armed
            && input.status.mode != FlightMode::Other;
        if !preconditions {
            if self.state != ControllerState::Idle && self.state != ControllerState::Error {
                info!("Preconditions lost ({}), standing down", self.state.name());
                self.clear_target();
                self.sampler = None;
                self.state = ControllerState::Idle;
            }
            return self.output(None);
        }

        // Transient position-fix tracking
        if !input.flight.has_fix {
            self.fix_failures += 1;
            if self.fix_failures >= MAX_FIX_FAILURES && self.state != ControllerState::Error {
                error!(
                    "Position fix lost for {} consecutive ticks, entering error state",
                    self.fix_failures
                );
                self.clear_target();
                self.sampler = None;
                self.state = ControllerState::Error;
            }
            return self.output(None);
        } else if self.fix_failures > 0 {
            self.fix_failures -= 1;
            if self.state == ControllerState::Error && self.fix_failures == 0 {
                info!("Position fix recovered, leaving error state");
                self.state = ControllerState::Idle;
            }
        }

        let wind = self.wind_cache.get(now, input.wind);

        // Chunked grid construction: bounded work per tick
        if !self.grid.is_ready() {
            self.grid.step(&self.area);
        }

        self.energy.update(input.flight.altitude_m);

        // Gesture detectors run every active tick
        let override_active = self.state == ControllerState::PilotOverride;
        let pilot_events = self.pilot.update(
            &input.roll_channel,
            &input.pitch_channel,
            now,
            override_active,
        );

        let command = match self.state {
            ControllerState::Idle => {
                if input.status.mode == FlightMode::Cruise {
                    info!("Preconditions met, starting navigation");
                    self.state = ControllerState::Navigating;
                }
                None
            }

            ControllerState::Navigating => self.navigate(input, wind, pilot_events.manual_input),

            ControllerState::ThermalPause => {
                if input.status.mode != FlightMode::LiftCircle {
                    self.finish_thermal(now, wind);
                } else if let Some(sampler) = &mut self.sampler {
                    sampler.update(input.flight.climb_rate, now);
                }
                None
            }

            ControllerState::PilotOverride => {
                if pilot_events.recenter {
                    self.area.recenter(input.flight.position);
                    self.grid.rebuild();
                    self.clear_target();
                }
                if self.pilot.can_resume(now) {
                    info!("Sticks neutral, resuming navigation");
                    self.state = ControllerState::Navigating;
                }
                None
            }

            ControllerState::Error => None,
        };

        debug!(
            "tick: state={} energy={:?} target={} hotspots={} alt={:.0}m",
            self.state.name(),
            self.energy.state(),
            self.target.is_some(),
            self.memory.active_count(now),
            input.flight.altitude_m
        );

        self.output(command)
    }

    /// One navigating tick: mode/override checks, target upkeep, roll command.
    fn navigate(&mut self, input: &TickInput, wind: Vec2, manual: bool) -> Option<u16> {
        let now = input.now_ms;

        if input.status.mode == FlightMode::LiftCircle {
            info!("Lift-circling reported, pausing navigation to sample");
            self.selector.record_lift_entry(now);
            self.sampler = Some(ThermalSampler::begin(input.flight.position, now));
            self.clear_target();
            self.state = ControllerState::ThermalPause;
            return None;
        }

        if manual {
            info!("Manual stick input, suspending command output");
            self.state = ControllerState::PilotOverride;
            return None;
        }

        if self.target.is_none() {
            if let Some(target) = self.selector.select(
                now,
                self.energy.state(),
                &self.memory,
                &mut self.grid,
                &self.area,
                wind,
            ) {
                info!(
                    "New target ({:?}) at ({:.5}, {:.5})",
                    target.source, target.location.lat, target.location.lon
                );
                let distance = geo::distance_m(input.flight.position, target.location);
                self.progress.arm(now, distance);
                self.roll.reset();
                self.target = Some(target);
            } else {
                debug!("No target available this tick");
                return None;
            }
        }

        let target = self.target?;
        let distance = geo::distance_m(input.flight.position, target.location);

        if distance < self.config.nav.arrival_radius_m {
            if target.source == TargetSource::Reposition && self.saved_target.is_some() {
                if let Some(original) = self.saved_target.take() {
                    info!("Reposition complete, resuming original target");
                    let d = geo::distance_m(input.flight.position, original.location);
                    self.progress.arm(now, d);
                    self.roll.reset();
                    self.target = Some(original);
                }
            } else {
                info!("Target reached ({:.0}m)", distance);
                self.clear_target();
            }
            return None;
        }

        match self.progress.check(now, distance, wind.speed()) {
            ProgressAction::Stuck => {
                // Save the original destination once; a stalled reposition
                // just gets a fresh upwind point
                if target.source != TargetSource::Reposition {
                    self.saved_target = Some(target);
                }
                let point = nav::upwind_point(input.flight.position, wind);
                info!(
                    "Repositioning upwind to ({:.5}, {:.5})",
                    point.lat, point.lon
                );
                let reposition = NavigationTarget {
                    location: point,
                    source: TargetSource::Reposition,
                    created_ms: now,
                };
                self.progress
                    .arm(now, geo::distance_m(input.flight.position, point));
                self.roll.reset();
                self.target = Some(reposition);
                None
            }
            ProgressAction::Timeout => {
                warn!("Target abandoned on timeout");
                self.clear_target();
                None
            }
            ProgressAction::Continue => {
                let roll_deg = self.roll.update(
                    input.flight.position,
                    input.flight.heading_deg,
                    target.location,
                );
                Some(self.roll.to_pwm(roll_deg, &input.roll_channel))
            }
        }
    }

    /// Close out a thermal encounter and store the hotspot if usable.
    fn finish_thermal(&mut self, now: u64, wind: Vec2) {
        if let Some(sampler) = self.sampler.take() {
            let samples = sampler.sample_count();
            match sampler.finish(now, wind, &self.area, &self.config.thermal) {
                Some(hotspot) => self.memory.insert(hotspot),
                None => debug!("Thermal encounter dropped ({} samples)", samples),
            }
        }
        self.state = ControllerState::Navigating;
    }

    /// Drop the active target and its timers as a unit.
    fn clear_target(&mut self) {
        self.target = None;
        self.saved_target = None;
        self.roll.reset();
    }

    fn output(&self, command: Option<u16>) -> TickOutput {
        let next_tick_ms = match self.state {
            ControllerState::Idle => IDLE_INTERVAL_MS,
            ControllerState::Error => ERROR_INTERVAL_MS,
            _ => self.config.loop_period_ms,
        };
        TickOutput {
            command,
            next_tick_ms,
            state: self.state,
        }
    }

    /// One-line human-readable status summary.
    pub fn status_line(&self, now_ms: u64) -> String {
        format!(
            "{} energy={:?} target={} hotspots={} grid={}/{} cells",
            self.state.name(),
            self.energy.state(),
            self.target
                .map(|t| format!("{:?}", t.source))
                .unwrap_or_else(|| "none".to_string()),
            self.memory.active_count(now_ms),
            self.grid.unvisited_count(),
            self.grid.valid_count(),
        )
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn target(&self) -> Option<&NavigationTarget> {
        self.target.as_ref()
    }

    pub fn memory(&self) -> &ThermalMemory {
        &self.memory
    }

    pub fn grid(&self) -> &ExplorationGrid {
        &self.grid
    }

    pub fn area(&self) -> &AreaManager {
        &self.area
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::{FlightSample, RcChannel, Vec2, VehicleStatus};

    fn input(now_ms: u64) -> TickInput {
        TickInput {
            now_ms,
            flight: FlightSample {
                position: Location::new(47.0, 8.0),
                altitude_m: 300.0,
                heading_deg: 0.0,
                climb_rate: 0.0,
                has_fix: true,
            },
            wind: Vec2::default(),
            roll_channel: RcChannel::neutral(1500, 1100, 1900),
            pitch_channel: RcChannel::neutral(1500, 1100, 1900),
            status: VehicleStatus {
                armed: true,
                mode: FlightMode::Cruise,
            },
        }
    }

    fn controller() -> SoarController {
        SoarController::with_seed(SoarConfig::default(), Location::new(47.0, 8.0), 42).unwrap()
    }

    /// Drive ticks until the grid is ready and a target exists.
    fn run_until_target(c: &mut SoarController, start_ms: u64) -> u64 {
        let mut now = start_ms;
        for _ in 0..200 {
            c.tick(&input(now));
            now += 200;
            if c.target().is_some() {
                return now;
            }
        }
        panic!("no target after 200 ticks");
    }

    #[test]
    fn test_idle_to_navigating() {
        let mut c = controller();
        assert_eq!(c.state(), ControllerState::Idle);
        let out = c.tick(&input(1000));
        assert_eq!(out.state, ControllerState::Navigating);
    }

    #[test]
    fn test_disarm_collapses_same_tick() {
        let mut c = controller();
        run_until_target(&mut c, 1000);
        assert_eq!(c.state(), ControllerState::Navigating);

        let mut i = input(60_000);
        i.status.armed = false;
        let out = c.tick(&i);
        assert_eq!(out.state, ControllerState::Idle);
        assert!(out.command.is_none());
        assert!(c.target().is_none());
    }

    #[test]
    fn test_disarm_during_fix_loss_still_collapses() {
        let mut c = controller();
        run_until_target(&mut c, 1000);

        // Disarm and fix loss arriving on the same tick: stand-down wins
        let mut i = input(60_000);
        i.status.armed = false;
        i.flight.has_fix = false;
        let out = c.tick(&i);
        assert_eq!(out.state, ControllerState::Idle);
        assert!(c.target().is_none());
    }

    #[test]
    fn test_apply_config_tightens_hotspot_capacity() {
        let mut c = controller();
        let mut now = run_until_target(&mut c, 1000);

        // Two thermal encounters at different spots
        for bearing in [0.0, 90.0] {
            let spot = geo::destination(Location::new(47.0, 8.0), bearing, 200.0);
            let mut circling = input(now);
            circling.status.mode = FlightMode::LiftCircle;
            circling.flight.position = spot;
            circling.flight.climb_rate = 2.0;
            for _ in 0..60 {
                circling.now_ms = now;
                c.tick(&circling);
                now += 200;
            }
            let mut cruise = input(now);
            cruise.flight.position = spot;
            c.tick(&cruise);
            now += 200;
        }
        assert_eq!(c.memory().len(), 2);

        // A tighter limit must apply to the kept store immediately
        let mut tight = SoarConfig::default();
        tight.thermal.max_hotspots = 1;
        c.apply_config(tight);
        assert_eq!(c.memory().len(), 1);
    }

    #[test]
    fn test_target_selected_and_commanded() {
        let mut c = controller();
        let mut now = run_until_target(&mut c, 1000);
        // A target inside the arrival radius is consumed immediately; within
        // a few ticks a trackable one produces a steering command
        let mut command = None;
        for _ in 0..20 {
            let out = c.tick(&input(now));
            now += 200;
            if out.command.is_some() {
                command = out.command;
                break;
            }
        }
        let pwm = command.expect("no steering command emitted");
        assert!((1100..=1900).contains(&pwm));
    }

    #[test]
    fn test_fix_loss_escalates_then_recovers() {
        let mut c = controller();
        run_until_target(&mut c, 1000);

        let mut now = 60_000;
        let mut no_fix = input(now);
        no_fix.flight.has_fix = false;
        for _ in 0..MAX_FIX_FAILURES {
            no_fix.now_ms = now;
            c.tick(&no_fix);
            now += 200;
        }
        assert_eq!(c.state(), ControllerState::Error);
        assert!(c.target().is_none());

        // Consecutive good fixes decrement the counter back to zero
        for _ in 0..MAX_FIX_FAILURES {
            c.tick(&input(now));
            now += 200;
        }
        assert_ne!(c.state(), ControllerState::Error);
    }

    #[test]
    fn test_thermal_pause_records_hotspot() {
        let mut c = controller();
        let mut now = run_until_target(&mut c, 1000);

        // Host enters lift-circling; sampler collects for a while
        let mut circling = input(now);
        circling.status.mode = FlightMode::LiftCircle;
        circling.flight.climb_rate = 2.0;
        for _ in 0..120 {
            circling.now_ms = now;
            let out = c.tick(&circling);
            assert_eq!(out.state, ControllerState::ThermalPause);
            assert!(out.command.is_none());
            now += 200;
        }

        // Back to cruise: the encounter becomes a hotspot
        let out = c.tick(&input(now));
        assert_eq!(out.state, ControllerState::Navigating);
        assert_eq!(c.memory().len(), 1);
    }

    #[test]
    fn test_pilot_override_and_resume() {
        let mut c = controller();
        let mut now = run_until_target(&mut c, 1000);

        let mut deflected = input(now);
        deflected.roll_channel.pwm_us = 1700;
        let out = c.tick(&deflected);
        assert_eq!(out.state, ControllerState::PilotOverride);
        assert!(out.command.is_none());

        // Neutral sticks: resumes after the 5s delay
        now += 200;
        let out = c.tick(&input(now));
        assert_eq!(out.state, ControllerState::PilotOverride);
        now += 5200;
        let out = c.tick(&input(now));
        assert_eq!(out.state, ControllerState::Navigating);
    }

    #[test]
    fn test_invalid_config_disables() {
        let mut c = controller();
        c.tick(&input(1000));

        let mut bad = SoarConfig::default();
        bad.area.radius_m = 1.0;
        c.apply_config(bad);
        assert_eq!(c.state(), ControllerState::Error);
        let out = c.tick(&input(2000));
        assert_eq!(out.state, ControllerState::Error);
        assert_eq!(out.next_tick_ms, ERROR_INTERVAL_MS);

        // A valid configuration restores operation
        c.apply_config(SoarConfig::default());
        assert_eq!(c.state(), ControllerState::Idle);
    }

    #[test]
    fn test_error_interval_slower_than_nominal() {
        let mut c = controller();
        let out = c.tick(&input(1000));
        assert_eq!(out.next_tick_ms, SoarConfig::default().loop_period_ms);

        let mut bad = SoarConfig::default();
        bad.grid.max_cells = 0;
        c.apply_config(bad);
        let out = c.tick(&input(2000));
        assert!(out.next_tick_ms > SoarConfig::default().loop_period_ms);
    }
}
