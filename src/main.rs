//! GarudaSoar demo harness: a simulated glider flying the controller.
//!
//! Stands in for the host firmware: a point-mass glider with bank-to-turn
//! kinematics, a constant sink rate, a handful of synthetic thermals and a
//! steady wind. The simulator owns the clock and the flight-mode logic
//! (entering lift-circling when sustained climb is seen), exactly the split
//! the controller expects from real firmware.

use garuda_soar::{
    ControllerState, FlightMode, FlightSample, Location, RcChannel, Result, SoarConfig,
    SoarController, TickInput, Vec2, VehicleStatus,
};
use std::path::Path;
use tracing::info;

/// Synthetic thermal bubble.
struct Bubble {
    center: Location,
    /// Core climb rate, m/s
    strength: f32,
    /// Gaussian radius, meters
    radius_m: f64,
}

/// Point-mass glider state.
struct Glider {
    position: Location,
    altitude_m: f32,
    heading_deg: f32,
    roll_deg: f32,
}

const AIRSPEED_MS: f64 = 12.0;
const SINK_RATE_MS: f32 = 0.7;
/// Sustained climb that makes the "firmware" start lift-circling, m/s.
const LIFT_ENTRY_MS: f32 = 0.5;
/// Circling turn rate while in lift, deg/s.
const CIRCLE_RATE_DPS: f32 = 18.0;
/// Simulated flight duration, minutes.
const FLIGHT_MINUTES: u64 = 45;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("garuda_soar=info".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = if let Some(path) = args.get(1) {
        info!("Loading configuration from {}", path);
        SoarConfig::load(Path::new(path))?
    } else if Path::new("garuda.toml").exists() {
        info!("Loading configuration from garuda.toml");
        SoarConfig::load(Path::new("garuda.toml"))?
    } else {
        info!("Using default configuration");
        SoarConfig::default()
    };

    info!("GarudaSoar v{}", env!("CARGO_PKG_VERSION"));

    let home = Location::new(47.0, 8.0);
    let mut controller = SoarController::new(config, home)?;

    let wind = Vec2::new(2.5, 1.0);
    let bubbles = [
        Bubble {
            center: garuda_soar::geo::destination(home, 60.0, 250.0),
            strength: 2.5,
            radius_m: 120.0,
        },
        Bubble {
            center: garuda_soar::geo::destination(home, 200.0, 350.0),
            strength: 1.8,
            radius_m: 100.0,
        },
        Bubble {
            center: garuda_soar::geo::destination(home, 310.0, 180.0),
            strength: 3.0,
            radius_m: 90.0,
        },
    ];

    let mut glider = Glider {
        position: home,
        altitude_m: 350.0,
        heading_deg: 0.0,
        roll_deg: 0.0,
    };
    let mut mode = FlightMode::Cruise;
    let mut circle_until_ms = 0u64;
    let mut sustained_climb_ms = 0u64;
    let mut now_ms = 0u64;
    let mut last_status_ms = 0u64;

    let roll_channel = RcChannel::neutral(1500, 1100, 1900);
    let pitch_channel = RcChannel::neutral(1500, 1100, 1900);

    while now_ms < FLIGHT_MINUTES * 60 * 1000 {
        let climb = climb_rate(&glider, &bubbles);

        // Firmware-side mode logic: sustained climb starts lift-circling
        match mode {
            FlightMode::Cruise => {
                if climb > LIFT_ENTRY_MS {
                    sustained_climb_ms += 200;
                    if sustained_climb_ms >= 3000 {
                        info!("sim: climb {:.1} m/s sustained, circling", climb);
                        mode = FlightMode::LiftCircle;
                        circle_until_ms = now_ms + 90_000;
                    }
                } else {
                    sustained_climb_ms = 0;
                }
            }
            FlightMode::LiftCircle => {
                // Leave early when the lift dies, otherwise on the timer
                if climb < 0.0 || now_ms >= circle_until_ms {
                    info!("sim: leaving lift (climb {:.1} m/s)", climb);
                    mode = FlightMode::Cruise;
                    sustained_climb_ms = 0;
                }
            }
            FlightMode::Other => {}
        }

        let input = TickInput {
            now_ms,
            flight: FlightSample {
                position: glider.position,
                altitude_m: glider.altitude_m,
                heading_deg: glider.heading_deg,
                climb_rate: climb,
                has_fix: true,
            },
            wind,
            roll_channel,
            pitch_channel,
            status: VehicleStatus { armed: true, mode },
        };

        let output = controller.tick(&input);
        let dt_ms = output.next_tick_ms.max(1);

        // Apply the roll command; circling overrides it with a fixed bank
        match mode {
            FlightMode::LiftCircle => {
                glider.roll_deg = 30.0;
                glider.heading_deg =
                    (glider.heading_deg + CIRCLE_RATE_DPS * dt_ms as f32 / 1000.0) % 360.0;
            }
            _ => {
                if let Some(pwm) = output.command {
                    glider.roll_deg = pwm_to_roll(pwm, &roll_channel);
                }
                if output.state != ControllerState::Navigating {
                    glider.roll_deg = 0.0;
                }
                step_heading(&mut glider, dt_ms);
            }
        }
        step_position(&mut glider, wind, dt_ms);
        glider.altitude_m += climb * dt_ms as f32 / 1000.0;

        if glider.altitude_m < 30.0 {
            info!("sim: glider down to {:.0}m, landing out", glider.altitude_m);
            break;
        }

        if now_ms.saturating_sub(last_status_ms) >= 10_000 {
            info!(
                "t={}s alt={:.0}m {}",
                now_ms / 1000,
                glider.altitude_m,
                controller.status_line(now_ms)
            );
            last_status_ms = now_ms;
        }

        now_ms += dt_ms;
    }

    info!(
        "sim: flight over after {}s, final altitude {:.0}m, {} hotspots remembered",
        now_ms / 1000,
        glider.altitude_m,
        controller.memory().len()
    );
    Ok(())
}

/// Net vario reading at the glider's position: bubble lift minus sink.
fn climb_rate(glider: &Glider, bubbles: &[Bubble]) -> f32 {
    let lift: f32 = bubbles
        .iter()
        .map(|b| {
            let d = garuda_soar::geo::distance_m(glider.position, b.center);
            let falloff = (-(d * d) / (b.radius_m * b.radius_m)).exp() as f32;
            b.strength * falloff
        })
        .sum();
    lift - SINK_RATE_MS
}

/// Decode an actuator pulse width back into a bank angle.
fn pwm_to_roll(pwm: u16, channel: &RcChannel) -> f32 {
    let frac = if pwm >= channel.trim_us {
        (pwm - channel.trim_us) as f32 / (channel.max_us - channel.trim_us).max(1) as f32
    } else {
        -((channel.trim_us - pwm) as f32 / (channel.trim_us - channel.min_us).max(1) as f32)
    };
    frac * 45.0
}

/// Coordinated-turn heading update: turn rate from bank angle and airspeed.
fn step_heading(glider: &mut Glider, dt_ms: u64) {
    let turn_rate_dps =
        (9.81 * (glider.roll_deg as f64).to_radians().tan() / AIRSPEED_MS).to_degrees();
    glider.heading_deg =
        (glider.heading_deg + (turn_rate_dps * dt_ms as f64 / 1000.0) as f32).rem_euclid(360.0);
}

/// Advance the position by airspeed along the heading plus wind drift.
fn step_position(glider: &mut Glider, wind: Vec2, dt_ms: u64) {
    let dt_s = dt_ms as f64 / 1000.0;
    glider.position = garuda_soar::geo::destination(
        glider.position,
        glider.heading_deg as f64,
        AIRSPEED_MS * dt_s,
    );
    let drift = (wind.speed() as f64) * dt_s;
    if drift > 0.0 {
        glider.position =
            garuda_soar::geo::destination(glider.position, wind.bearing_deg(), drift);
    }
}
