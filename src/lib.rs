//! # GarudaSoar: Autonomous Thermal-Seeking Navigation
//!
//! A soaring controller for fixed-wing gliders: it steers the aircraft
//! between suspected lift locations inside a bounded operational area,
//! remembers thermals the host firmware centers in, and trades exploration
//! against exploitation based on the current altitude margin.
//!
//! The crate is host-agnostic. The firmware (or a simulator) calls
//! [`SoarController::tick`] with a [`TickInput`] snapshot at the cadence the
//! previous tick requested, and applies the returned roll-channel command.
//! The controller never blocks, reads hardware, or keeps its own clock.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use garuda_soar::{Location, SoarConfig, SoarController};
//! use garuda_soar::{FlightMode, FlightSample, RcChannel, TickInput, Vec2, VehicleStatus};
//!
//! let home = Location::new(47.0, 8.0);
//! let mut controller = SoarController::new(SoarConfig::default(), home)?;
//!
//! let input = TickInput {
//!     now_ms: 0,
//!     flight: FlightSample {
//!         position: home,
//!         altitude_m: 300.0,
//!         heading_deg: 90.0,
//!         climb_rate: 0.2,
//!         has_fix: true,
//!     },
//!     wind: Vec2::new(2.0, 0.5),
//!     roll_channel: RcChannel::neutral(1500, 1100, 1900),
//!     pitch_channel: RcChannel::neutral(1500, 1100, 1900),
//!     status: VehicleStatus { armed: true, mode: FlightMode::Cruise },
//! };
//! let output = controller.tick(&input);
//! if let Some(pwm) = output.command {
//!     // write pwm to the roll override channel
//! }
//! // schedule the next tick after output.next_tick_ms
//! # Ok::<(), garuda_soar::SoarError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`area`]: Operational area boundary (circle or polygon) and re-centering
//! - [`grid`]: Incrementally built exploration grid with visit tracking
//! - [`thermal`]: Thermal sampling and the bounded hotspot memory
//! - [`energy`]: Altitude-margin state machine with hysteresis
//! - [`selector`]: Energy-gated waypoint selection
//! - [`nav`]: PD roll steering, progress monitoring, upwind repositioning
//! - [`pilot`]: Stick-gesture detection and override handling
//! - [`controller`]: The top-level state machine tying everything together

pub mod area;
pub mod config;
pub mod controller;
pub mod energy;
pub mod error;
pub mod geo;
pub mod grid;
pub mod inputs;
pub mod nav;
pub mod pilot;
pub mod selector;
pub mod thermal;

pub use config::SoarConfig;
pub use controller::{ControllerState, SoarController, TickOutput};
pub use energy::EnergyState;
pub use error::{Result, SoarError};
pub use geo::Location;
pub use inputs::{FlightMode, FlightSample, RcChannel, TickInput, Vec2, VehicleStatus};
pub use selector::{NavigationTarget, TargetSource};
pub use thermal::Hotspot;
