//! External-interface types consumed by the control loop.
//!
//! Everything the firmware hands to the controller each tick lives here:
//! position/attitude samples, wind estimate, RC channel readings and the
//! vehicle arming/mode status. The controller never reads hardware itself.

use crate::geo::Location;

/// A 2D vector in the local NE frame (x = north, y = east), m/s.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Magnitude in m/s.
    pub fn speed(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Compass bearing the vector points toward, degrees [0, 360).
    pub fn bearing_deg(&self) -> f64 {
        let deg = (self.y as f64).atan2(self.x as f64).to_degrees();
        (deg + 360.0) % 360.0
    }
}

/// One flight-state estimator sample.
#[derive(Clone, Copy, Debug)]
pub struct FlightSample {
    pub position: Location,
    /// Altitude above home, meters
    pub altitude_m: f32,
    /// Ground-track heading, degrees [0, 360)
    pub heading_deg: f32,
    /// Vertical speed, positive up, m/s
    pub climb_rate: f32,
    /// Whether the position estimate is currently usable
    pub has_fix: bool,
}

/// One RC input channel with its calibration.
#[derive(Clone, Copy, Debug)]
pub struct RcChannel {
    pub pwm_us: u16,
    pub trim_us: u16,
    pub min_us: u16,
    pub max_us: u16,
}

impl RcChannel {
    /// A channel resting at its trim point.
    pub fn neutral(trim_us: u16, min_us: u16, max_us: u16) -> Self {
        Self {
            pwm_us: trim_us,
            trim_us,
            min_us,
            max_us,
        }
    }

    /// Normalized deflection in [-1, 1], with separate scaling on each side
    /// of trim.
    pub fn deflection(&self) -> f32 {
        if self.pwm_us >= self.trim_us {
            let travel = self.max_us.saturating_sub(self.trim_us).max(1) as f32;
            ((self.pwm_us - self.trim_us) as f32 / travel).min(1.0)
        } else {
            let travel = self.trim_us.saturating_sub(self.min_us).max(1) as f32;
            -(((self.trim_us - self.pwm_us) as f32 / travel).min(1.0))
        }
    }

    /// Whether the stick is deflected beyond the deadzone.
    pub fn is_active(&self, deadzone_us: u16) -> bool {
        self.pwm_us.abs_diff(self.trim_us) > deadzone_us
    }
}

/// Flight mode as reported by the host firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightMode {
    /// Autonomous cruise; the controller may steer
    Cruise,
    /// The host is centering a thermal (lift-circling)
    LiftCircle,
    /// Any other mode; the controller stands down
    Other,
}

/// Arming and mode status.
#[derive(Clone, Copy, Debug)]
pub struct VehicleStatus {
    pub armed: bool,
    pub mode: FlightMode,
}

/// Everything the controller reads on one tick.
#[derive(Clone, Copy, Debug)]
pub struct TickInput {
    /// Host time, milliseconds
    pub now_ms: u64,
    pub flight: FlightSample,
    /// Wind velocity estimate (direction the air moves toward)
    pub wind: Vec2,
    pub roll_channel: RcChannel,
    pub pitch_channel: RcChannel,
    pub status: VehicleStatus,
}

/// Cached wind estimate with a short TTL.
///
/// The estimator read is rate-limited on purpose; readers between refreshes
/// see the cached vector.
#[derive(Clone, Copy, Debug)]
pub struct WindCache {
    vector: Vec2,
    /// None until the first read seeds the cache
    stamp_ms: Option<u64>,
    ttl_ms: u64,
}

impl WindCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            vector: Vec2::default(),
            stamp_ms: None,
            ttl_ms,
        }
    }

    /// Return the cached vector, refreshing from `fresh` on the first read and
    /// whenever the TTL lapses.
    pub fn get(&mut self, now_ms: u64, fresh: Vec2) -> Vec2 {
        let stale = match self.stamp_ms {
            Some(stamp) => now_ms.saturating_sub(stamp) >= self.ttl_ms,
            None => true,
        };
        if stale {
            self.vector = fresh;
            self.stamp_ms = Some(now_ms);
        }
        self.vector
    }
}
