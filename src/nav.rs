//! Closed-loop roll steering and anti-stall progress monitoring.
//!
//! The roll controller turns a bearing-to-target into a smoothed, clamped
//! bank command. Smoothing is one-sided: the command is slow to grow and
//! fast to decay, which damps overshoot without delaying convergence.

use crate::config::NavConfig;
use crate::geo::{self, normalize_heading, Location};
use crate::inputs::{RcChannel, Vec2};
use tracing::{debug, warn};

/// Blend factor applied when the raw command magnitude is increasing.
const RISE_SMOOTHING: f32 = 0.1;

/// Discrete-time PD controller producing a roll command in degrees.
pub struct RollController {
    kp: f32,
    kd: f32,
    roll_limit_deg: f32,
    vehicle_roll_limit_deg: f32,
    /// Control rate for the derivative term, Hz
    rate_hz: f32,
    prev_error: f32,
    prev_command: f32,
}

impl RollController {
    pub fn new(config: &NavConfig, loop_period_ms: u64) -> Self {
        Self {
            kp: config.kp,
            kd: config.kd,
            // The configured limit is itself held to a safe absolute range
            roll_limit_deg: config.roll_limit_deg.clamp(10.0, 45.0),
            vehicle_roll_limit_deg: config.vehicle_roll_limit_deg.clamp(10.0, 60.0),
            rate_hz: 1000.0 / loop_period_ms.max(1) as f32,
            prev_error: 0.0,
            prev_command: 0.0,
        }
    }

    /// Clear controller history when the target changes.
    pub fn reset(&mut self) {
        self.prev_error = 0.0;
        self.prev_command = 0.0;
    }

    /// Compute the roll command for the current pose.
    pub fn update(&mut self, current: Location, heading_deg: f32, target: Location) -> f32 {
        let bearing = geo::bearing_deg(current, target) as f32;
        let error = normalize_heading(bearing - heading_deg);

        let derivative = (error - self.prev_error) * self.rate_hz;
        let raw = error * self.kp + derivative * self.kd;

        // One-sided smoothing: blend slowly toward a growing command, pass a
        // shrinking one straight through
        let command = if raw.abs() > self.prev_command.abs() {
            self.prev_command + RISE_SMOOTHING * (raw - self.prev_command)
        } else {
            raw
        };
        let command = command.clamp(-self.roll_limit_deg, self.roll_limit_deg);

        self.prev_error = error;
        self.prev_command = command;
        command
    }

    /// Map a roll command (degrees) onto the actuator channel range.
    ///
    /// Scaling is separate above and below trim and normalized by the
    /// vehicle's absolute roll limit.
    pub fn to_pwm(&self, roll_deg: f32, channel: &RcChannel) -> u16 {
        let frac = (roll_deg / self.vehicle_roll_limit_deg).clamp(-1.0, 1.0);
        let pwm = if frac >= 0.0 {
            channel.trim_us as f32 + frac * (channel.max_us - channel.trim_us) as f32
        } else {
            channel.trim_us as f32 + frac * (channel.trim_us - channel.min_us) as f32
        };
        (pwm.round() as u16).clamp(channel.min_us, channel.max_us)
    }
}

/// Outcome of a progress check against the active target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressAction {
    /// Keep tracking the target
    Continue,
    /// Progress has stalled; redirect upwind and retry
    Stuck,
    /// Absolute timeout elapsed; regenerate the target
    Timeout,
}

/// Grace period after a target is set before progress checks start (ms).
const GRACE_MS: u64 = 30_000;
/// Interval between progress comparisons (ms).
const CHECK_INTERVAL_MS: u64 = 20_000;
/// Minimum distance gained per check to count as progress (meters).
const MIN_PROGRESS_M: f64 = 10.0;

/// Detects stalled progress toward the target and enforces an adaptive
/// absolute timeout.
pub struct ProgressMonitor {
    timeout_base_s: f32,
    armed_ms: u64,
    last_check_ms: u64,
    last_distance_m: f64,
    stuck_count: u32,
}

impl ProgressMonitor {
    pub fn new(config: &NavConfig) -> Self {
        Self {
            timeout_base_s: config.waypoint_timeout_s,
            armed_ms: 0,
            last_check_ms: 0,
            last_distance_m: 0.0,
            stuck_count: 0,
        }
    }

    /// Arm the monitor for a freshly assigned target.
    pub fn arm(&mut self, now_ms: u64, distance_m: f64) {
        self.armed_ms = now_ms;
        self.last_check_ms = now_ms;
        self.last_distance_m = distance_m;
        self.stuck_count = 0;
    }

    /// Stuck-counter trigger threshold: stronger wind tolerates more
    /// slow-progress cycles, clamped to [2, 5].
    fn stuck_threshold(wind_speed: f32) -> u32 {
        (2.0 + wind_speed / 2.0).clamp(2.0, 5.0) as u32
    }

    /// Adaptive absolute timeout, scaled up to 2.5x with wind speed.
    fn timeout_ms(&self, wind_speed: f32) -> u64 {
        let scale = (1.0 + wind_speed / 8.0).clamp(1.0, 2.5);
        (self.timeout_base_s * scale * 1000.0) as u64
    }

    /// Evaluate progress toward the target.
    pub fn check(&mut self, now_ms: u64, distance_m: f64, wind_speed: f32) -> ProgressAction {
        if now_ms.saturating_sub(self.armed_ms) >= self.timeout_ms(wind_speed) {
            warn!(
                "Waypoint timeout after {:.0}s, regenerating target",
                now_ms.saturating_sub(self.armed_ms) as f32 / 1000.0
            );
            return ProgressAction::Timeout;
        }

        if now_ms.saturating_sub(self.armed_ms) < GRACE_MS {
            return ProgressAction::Continue;
        }
        if now_ms.saturating_sub(self.last_check_ms) < CHECK_INTERVAL_MS {
            return ProgressAction::Continue;
        }

        let progress = self.last_distance_m - distance_m;
        self.last_check_ms = now_ms;
        self.last_distance_m = distance_m;

        if progress < MIN_PROGRESS_M {
            self.stuck_count += 1;
            debug!(
                "Insufficient progress ({:.1}m), stuck count {}",
                progress, self.stuck_count
            );
        } else {
            self.stuck_count = 0;
        }

        if self.stuck_count >= Self::stuck_threshold(wind_speed) {
            warn!(
                "Stuck toward target ({} slow cycles), repositioning upwind",
                self.stuck_count
            );
            self.stuck_count = 0;
            ProgressAction::Stuck
        } else {
            ProgressAction::Continue
        }
    }
}

/// Point upwind of `from` at an adaptive distance, clamped to [150, 700] m.
pub fn upwind_point(from: Location, wind: Vec2) -> Location {
    let distance = (wind.speed() as f64 * 100.0).clamp(150.0, 700.0);
    let bearing = if wind.speed() > 0.1 {
        (wind.bearing_deg() + 180.0) % 360.0
    } else {
        // Calm air: direction is arbitrary, push north
        0.0
    };
    geo::destination(from, bearing, distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controller() -> RollController {
        RollController::new(&NavConfig::default(), 200)
    }

    #[test]
    fn test_roll_limit_clamping() {
        let mut config = NavConfig::default();
        config.roll_limit_deg = 80.0;
        let c = RollController::new(&config, 200);
        assert_relative_eq!(c.roll_limit_deg, 45.0);

        config.roll_limit_deg = 2.0;
        let c = RollController::new(&config, 200);
        assert_relative_eq!(c.roll_limit_deg, 10.0);
    }

    #[test]
    fn test_command_clamped_to_limit() {
        let mut c = controller();
        let here = Location::new(47.0, 8.0);
        let target = geo::destination(here, 90.0, 1000.0);

        // Large heading error, repeated until smoothing saturates
        let mut cmd = 0.0;
        for _ in 0..200 {
            cmd = c.update(here, 270.0, target);
        }
        assert!(cmd.abs() <= 35.0 + 1e-3);
    }

    #[test]
    fn test_rising_command_is_smoothed() {
        let mut c = controller();
        let here = Location::new(47.0, 8.0);
        let target = geo::destination(here, 90.0, 1000.0);

        // First tick with a 90 degree error: the raw PD output saturates,
        // but the smoothed command only moves 10% of the way from zero
        let cmd = c.update(here, 0.0, target);
        assert!(cmd > 0.0);
        assert!(cmd < 20.0, "command {} not smoothed", cmd);
    }

    #[test]
    fn test_shrinking_error_gives_non_increasing_command() {
        let mut c = controller();
        let here = Location::new(47.0, 8.0);
        let target = geo::destination(here, 90.0, 1000.0);

        // Saturate the command at a large error first
        let mut prev = 0.0;
        for _ in 0..100 {
            prev = c.update(here, 20.0, target);
        }

        // Heading sweeps toward the bearing: error shrinks monotonically
        let mut heading = 25.0;
        while heading < 90.0 {
            let cmd = c.update(here, heading, target);
            assert!(
                cmd.abs() <= prev.abs() + 1e-4,
                "command grew: {} -> {}",
                prev,
                cmd
            );
            prev = cmd;
            heading += 5.0;
        }
    }

    #[test]
    fn test_pwm_mapping_asymmetric() {
        let c = controller();
        let ch = RcChannel {
            pwm_us: 1500,
            trim_us: 1500,
            min_us: 1000,
            max_us: 1900,
        };
        // vehicle limit 45: full positive roll maps to max
        assert_eq!(c.to_pwm(45.0, &ch), 1900);
        assert_eq!(c.to_pwm(-45.0, &ch), 1000);
        assert_eq!(c.to_pwm(0.0, &ch), 1500);
        // Half roll scales half the respective side
        assert_eq!(c.to_pwm(22.5, &ch), 1700);
        assert_eq!(c.to_pwm(-22.5, &ch), 1250);
    }

    #[test]
    fn test_stuck_counter_floor_in_calm_air() {
        // Scenario: zero wind, stagnant distance past the grace period
        let mut m = ProgressMonitor::new(&NavConfig::default());
        m.arm(0, 2000.0);

        // Inside grace period: nothing
        assert_eq!(m.check(10_000, 2000.0, 0.0), ProgressAction::Continue);

        // First 20s check after grace: stuck count 1
        assert_eq!(m.check(50_000, 1998.0, 0.0), ProgressAction::Continue);
        // Second check: threshold floor of 2 reached
        assert_eq!(m.check(70_000, 1997.0, 0.0), ProgressAction::Stuck);
    }

    #[test]
    fn test_progress_resets_counter() {
        let mut m = ProgressMonitor::new(&NavConfig::default());
        m.arm(0, 2000.0);
        assert_eq!(m.check(50_000, 1995.0, 0.0), ProgressAction::Continue);
        // Good progress: counter back to zero
        assert_eq!(m.check(70_000, 1900.0, 0.0), ProgressAction::Continue);
        assert_eq!(m.stuck_count, 0);
        assert_eq!(m.check(90_000, 1899.0, 0.0), ProgressAction::Continue);
        assert_eq!(m.stuck_count, 1);
    }

    #[test]
    fn test_windy_threshold_tolerates_more() {
        // 6 m/s wind: threshold (2 + 3) = 5
        assert_eq!(ProgressMonitor::stuck_threshold(6.0), 5);
        assert_eq!(ProgressMonitor::stuck_threshold(0.0), 2);
        assert_eq!(ProgressMonitor::stuck_threshold(20.0), 5);
    }

    #[test]
    fn test_absolute_timeout_scales_with_wind() {
        let m = ProgressMonitor::new(&NavConfig::default());
        assert_eq!(m.timeout_ms(0.0), 300_000);
        assert_eq!(m.timeout_ms(100.0), 750_000);

        let mut m = ProgressMonitor::new(&NavConfig::default());
        m.arm(0, 500.0);
        assert_eq!(m.check(300_000, 500.0, 0.0), ProgressAction::Timeout);
    }

    #[test]
    fn test_upwind_point_direction_and_clamp() {
        let here = Location::new(47.0, 8.0);
        // Wind blowing north at 3 m/s: upwind is south, 300m
        let p = upwind_point(here, Vec2::new(3.0, 0.0));
        assert!(p.lat < here.lat);
        assert_relative_eq!(geo::distance_m(here, p), 300.0, epsilon = 1.0);

        // Calm air: floor of 150m
        let p = upwind_point(here, Vec2::default());
        assert_relative_eq!(geo::distance_m(here, p), 150.0, epsilon = 1.0);

        // Gale: ceiling of 700m
        let p = upwind_point(here, Vec2::new(20.0, 0.0));
        assert_relative_eq!(geo::distance_m(here, p), 700.0, epsilon = 1.0);
    }
}
