//! Energy (altitude margin) state estimation with hysteresis.

use crate::config::EnergyConfig;
use tracing::info;

/// Altitude-margin classification driving waypoint strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnergyState {
    Critical,
    Low,
    Normal,
}

/// Classifies the current altitude margin.
///
/// Downgrades apply immediately; upgrades require clearing the threshold by
/// the hysteresis band so the state does not chatter at the boundary.
pub struct EnergyMonitor {
    config: EnergyConfig,
    state: EnergyState,
}

impl EnergyMonitor {
    pub fn new(config: EnergyConfig) -> Self {
        Self {
            config,
            state: EnergyState::Normal,
        }
    }

    pub fn state(&self) -> EnergyState {
        self.state
    }

    /// Update with the current altitude above home, returning the new state.
    pub fn update(&mut self, altitude_m: f32) -> EnergyState {
        let c = &self.config;
        let next = match self.state {
            EnergyState::Normal => {
                if altitude_m < c.critical_altitude_m {
                    EnergyState::Critical
                } else if altitude_m < c.low_altitude_m {
                    EnergyState::Low
                } else {
                    EnergyState::Normal
                }
            }
            EnergyState::Low => {
                if altitude_m < c.critical_altitude_m {
                    EnergyState::Critical
                } else if altitude_m > c.low_altitude_m + c.hysteresis_m {
                    EnergyState::Normal
                } else {
                    EnergyState::Low
                }
            }
            EnergyState::Critical => {
                if altitude_m > c.critical_altitude_m + c.hysteresis_m {
                    if altitude_m > c.low_altitude_m + c.hysteresis_m {
                        EnergyState::Normal
                    } else {
                        EnergyState::Low
                    }
                } else {
                    EnergyState::Critical
                }
            }
        };

        if next != self.state {
            info!(
                "Energy state {:?} -> {:?} at {:.0}m",
                self.state, next, altitude_m
            );
            self.state = next;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> EnergyMonitor {
        // critical 80, low 150, hysteresis 20
        EnergyMonitor::new(EnergyConfig::default())
    }

    #[test]
    fn test_downgrade_is_immediate() {
        let mut m = monitor();
        assert_eq!(m.update(200.0), EnergyState::Normal);
        assert_eq!(m.update(149.0), EnergyState::Low);
        assert_eq!(m.update(79.0), EnergyState::Critical);
    }

    #[test]
    fn test_upgrade_requires_hysteresis() {
        let mut m = monitor();
        m.update(79.0);
        assert_eq!(m.state(), EnergyState::Critical);

        // Just above critical: still critical
        assert_eq!(m.update(90.0), EnergyState::Critical);
        // Past critical + hysteresis: low
        assert_eq!(m.update(110.0), EnergyState::Low);
        // Just above low threshold: still low
        assert_eq!(m.update(160.0), EnergyState::Low);
        // Past low + hysteresis: normal
        assert_eq!(m.update(175.0), EnergyState::Normal);
    }

    #[test]
    fn test_no_chatter_at_boundary() {
        let mut m = monitor();
        m.update(149.0);
        assert_eq!(m.state(), EnergyState::Low);
        for alt in [151.0, 155.0, 149.0, 158.0] {
            assert_eq!(m.update(alt), EnergyState::Low);
        }
    }

    #[test]
    fn test_critical_recovers_straight_to_normal() {
        let mut m = monitor();
        m.update(50.0);
        assert_eq!(m.update(300.0), EnergyState::Normal);
    }
}
