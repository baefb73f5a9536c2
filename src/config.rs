//! Configuration loading and validation for GarudaSoar

use crate::error::{Result, SoarError};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Clone, Debug, Deserialize)]
pub struct SoarConfig {
    /// Master enable switch
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Nominal control loop period in milliseconds (default: 200)
    #[serde(default = "default_loop_period")]
    pub loop_period_ms: u64,

    #[serde(default)]
    pub area: AreaConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(default)]
    pub energy: EnergyConfig,
    #[serde(default)]
    pub nav: NavConfig,
    #[serde(default)]
    pub pilot: PilotConfig,
}

/// Operational area settings
#[derive(Clone, Debug, Deserialize)]
pub struct AreaConfig {
    /// Radius of the circular operating area in meters (default: 500)
    #[serde(default = "default_radius")]
    pub radius_m: f64,

    /// Optional polygon boundary file (one "lat lon" pair per line)
    #[serde(default)]
    pub polygon_path: Option<String>,
}

/// Exploration grid settings
#[derive(Clone, Debug, Deserialize)]
pub struct GridConfig {
    /// Upper bound on total grid cells (default: 128)
    #[serde(default = "default_max_cells")]
    pub max_cells: usize,

    /// Minimum cell edge length in meters (default: 30)
    #[serde(default = "default_min_cell_size")]
    pub min_cell_size_m: f64,

    /// Cells processed per construction step (default: 32)
    #[serde(default = "default_cells_per_step")]
    pub cells_per_step: usize,
}

/// Thermal memory settings
#[derive(Clone, Debug, Deserialize)]
pub struct ThermalConfig {
    /// Maximum remembered hotspots (default: 10)
    #[serde(default = "default_max_hotspots")]
    pub max_hotspots: usize,

    /// Hotspot lifetime in seconds (default: 1800)
    #[serde(default = "default_hotspot_lifetime")]
    pub hotspot_lifetime_s: f32,

    /// Sample variance below which lift counts as consistent, (m/s)^2
    #[serde(default = "default_variance_threshold")]
    pub variance_threshold: f32,

    /// Base wind-drift compensation time in seconds (default: 8)
    #[serde(default = "default_wind_compensation")]
    pub wind_compensation_s: f32,
}

/// Energy state thresholds (altitude margin above home, meters)
#[derive(Clone, Debug, Deserialize)]
pub struct EnergyConfig {
    /// Below this altitude the energy state is CRITICAL (default: 80)
    #[serde(default = "default_critical_altitude")]
    pub critical_altitude_m: f32,

    /// Below this altitude the energy state is LOW (default: 150)
    #[serde(default = "default_low_altitude")]
    pub low_altitude_m: f32,

    /// Hysteresis band for upgrading the state (default: 20)
    #[serde(default = "default_hysteresis")]
    pub hysteresis_m: f32,
}

/// Roll controller and waypoint tracking settings
#[derive(Clone, Debug, Deserialize)]
pub struct NavConfig {
    /// Proportional gain, degrees of roll per degree of heading error
    #[serde(default = "default_kp")]
    pub kp: f32,

    /// Derivative gain
    #[serde(default = "default_kd")]
    pub kd: f32,

    /// Commanded roll limit in degrees (clamped into [10, 45])
    #[serde(default = "default_roll_limit")]
    pub roll_limit_deg: f32,

    /// Vehicle absolute roll limit used for actuator scaling (default: 45)
    #[serde(default = "default_vehicle_roll_limit")]
    pub vehicle_roll_limit_deg: f32,

    /// Distance at which a waypoint counts as reached (default: 50)
    #[serde(default = "default_arrival_radius")]
    pub arrival_radius_m: f64,

    /// Base absolute timeout on a waypoint in seconds (default: 300)
    #[serde(default = "default_waypoint_timeout")]
    pub waypoint_timeout_s: f32,
}

/// Pilot interaction settings
#[derive(Clone, Debug, Deserialize)]
pub struct PilotConfig {
    /// Stick deadzone in microseconds of pulse width (default: 30)
    #[serde(default = "default_deadzone")]
    pub deadzone_us: u16,

    /// Gesture crossing threshold as a fraction of full travel (default: 0.8)
    #[serde(default = "default_gesture_threshold")]
    pub gesture_threshold: f32,

    /// Rolling timeout between gesture crossings in milliseconds (default: 2000)
    #[serde(default = "default_gesture_timeout")]
    pub gesture_timeout_ms: u64,

    /// Alternating crossings required to fire a gesture (default: 4)
    #[serde(default = "default_gesture_count")]
    pub gesture_count: u8,

    /// Delay after sticks return to neutral before resuming (default: 5000)
    #[serde(default = "default_resume_delay")]
    pub resume_delay_ms: u64,
}

// Default value functions
fn default_enabled() -> bool {
    true
}
fn default_loop_period() -> u64 {
    200
}
fn default_radius() -> f64 {
    500.0
}
fn default_max_cells() -> usize {
    128
}
fn default_min_cell_size() -> f64 {
    30.0
}
fn default_cells_per_step() -> usize {
    32
}
fn default_max_hotspots() -> usize {
    10
}
fn default_hotspot_lifetime() -> f32 {
    1800.0
}
fn default_variance_threshold() -> f32 {
    0.25
}
fn default_wind_compensation() -> f32 {
    8.0
}
fn default_critical_altitude() -> f32 {
    80.0
}
fn default_low_altitude() -> f32 {
    150.0
}
fn default_hysteresis() -> f32 {
    20.0
}
fn default_kp() -> f32 {
    1.0
}
fn default_kd() -> f32 {
    0.2
}
fn default_roll_limit() -> f32 {
    35.0
}
fn default_vehicle_roll_limit() -> f32 {
    45.0
}
fn default_arrival_radius() -> f64 {
    50.0
}
fn default_waypoint_timeout() -> f32 {
    300.0
}
fn default_deadzone() -> u16 {
    30
}
fn default_gesture_threshold() -> f32 {
    0.8
}
fn default_gesture_timeout() -> u64 {
    2000
}
fn default_gesture_count() -> u8 {
    4
}
fn default_resume_delay() -> u64 {
    5000
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            radius_m: default_radius(),
            polygon_path: None,
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_cells: default_max_cells(),
            min_cell_size_m: default_min_cell_size(),
            cells_per_step: default_cells_per_step(),
        }
    }
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            max_hotspots: default_max_hotspots(),
            hotspot_lifetime_s: default_hotspot_lifetime(),
            variance_threshold: default_variance_threshold(),
            wind_compensation_s: default_wind_compensation(),
        }
    }
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            critical_altitude_m: default_critical_altitude(),
            low_altitude_m: default_low_altitude(),
            hysteresis_m: default_hysteresis(),
        }
    }
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            kd: default_kd(),
            roll_limit_deg: default_roll_limit(),
            vehicle_roll_limit_deg: default_vehicle_roll_limit(),
            arrival_radius_m: default_arrival_radius(),
            waypoint_timeout_s: default_waypoint_timeout(),
        }
    }
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            deadzone_us: default_deadzone(),
            gesture_threshold: default_gesture_threshold(),
            gesture_timeout_ms: default_gesture_timeout(),
            gesture_count: default_gesture_count(),
            resume_delay_ms: default_resume_delay(),
        }
    }
}

impl Default for SoarConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            loop_period_ms: default_loop_period(),
            area: AreaConfig::default(),
            grid: GridConfig::default(),
            thermal: ThermalConfig::default(),
            energy: EnergyConfig::default(),
            nav: NavConfig::default(),
            pilot: PilotConfig::default(),
        }
    }
}

impl SoarConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SoarError::Config(format!("Failed to read config file: {}", e)))?;
        let config: SoarConfig =
            toml::from_str(&content).map_err(|e| SoarError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all parameters against their documented ranges.
    ///
    /// An out-of-range parameter disables the controller until corrected.
    pub fn validate(&self) -> Result<()> {
        fn check(name: &str, ok: bool) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(SoarError::Config(format!(
                    "parameter '{}' outside valid range",
                    name
                )))
            }
        }

        check("loop_period_ms", (50..=1000).contains(&self.loop_period_ms))?;
        check(
            "area.radius_m",
            self.area.radius_m >= 100.0 && self.area.radius_m <= 5000.0,
        )?;
        check(
            "grid.max_cells",
            (16..=4096).contains(&self.grid.max_cells),
        )?;
        check(
            "grid.min_cell_size_m",
            self.grid.min_cell_size_m >= 10.0 && self.grid.min_cell_size_m <= 500.0,
        )?;
        check(
            "grid.cells_per_step",
            (1..=1024).contains(&self.grid.cells_per_step),
        )?;
        check(
            "thermal.max_hotspots",
            (1..=50).contains(&self.thermal.max_hotspots),
        )?;
        check(
            "thermal.hotspot_lifetime_s",
            self.thermal.hotspot_lifetime_s >= 60.0 && self.thermal.hotspot_lifetime_s <= 7200.0,
        )?;
        check(
            "energy.thresholds",
            self.energy.critical_altitude_m > 0.0
                && self.energy.low_altitude_m > self.energy.critical_altitude_m,
        )?;
        check("nav.kp", self.nav.kp > 0.0 && self.nav.kp <= 10.0)?;
        check("nav.kd", self.nav.kd >= 0.0 && self.nav.kd <= 5.0)?;
        check(
            "nav.arrival_radius_m",
            self.nav.arrival_radius_m >= 10.0 && self.nav.arrival_radius_m <= 200.0,
        )?;
        check(
            "nav.waypoint_timeout_s",
            self.nav.waypoint_timeout_s >= 60.0 && self.nav.waypoint_timeout_s <= 1800.0,
        )?;
        check(
            "pilot.gesture_threshold",
            self.pilot.gesture_threshold > 0.0 && self.pilot.gesture_threshold < 1.0,
        )?;
        check("pilot.gesture_count", self.pilot.gesture_count >= 2)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SoarConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_radius() {
        let mut config = SoarConfig::default();
        config.area.radius_m = 50.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_energy_thresholds() {
        let mut config = SoarConfig::default();
        config.energy.low_altitude_m = 40.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parses_partial_toml() {
        let config: SoarConfig = toml::from_str(
            r#"
            [area]
            radius_m = 800.0

            [thermal]
            max_hotspots = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.area.radius_m, 800.0);
        assert_eq!(config.thermal.max_hotspots, 20);
        assert_eq!(config.grid.max_cells, 128);
        assert!(config.enabled);
    }
}
