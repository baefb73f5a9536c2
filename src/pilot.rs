//! Pilot interaction: stick-input detection and gesture state machines.
//!
//! Two independent detectors, one per stick axis, each counting alternating
//! full deflections within a rolling timeout. The roll axis toggles the
//! persistent manual-override flag; the pitch axis (only while an override
//! episode is active, once per episode) re-centers the operational area.

use crate::config::PilotConfig;
use crate::inputs::RcChannel;
use tracing::{debug, info};

/// Phase of an alternating-crossing gesture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GesturePhase {
    /// No sequence in progress
    Idle,
    /// Last crossing was positive; a negative one continues the sequence
    WaitingNegative,
    /// Last crossing was negative; a positive one continues the sequence
    WaitingPositive,
}

/// Counts alternating threshold crossings on one stick axis.
pub struct GestureDetector {
    phase: GesturePhase,
    count: u8,
    last_cross_ms: u64,
    threshold: f32,
    timeout_ms: u64,
    target_count: u8,
}

impl GestureDetector {
    pub fn new(config: &PilotConfig) -> Self {
        Self {
            phase: GesturePhase::Idle,
            count: 0,
            last_cross_ms: 0,
            threshold: config.gesture_threshold,
            timeout_ms: config.gesture_timeout_ms,
            target_count: config.gesture_count,
        }
    }

    fn reset(&mut self) {
        self.phase = GesturePhase::Idle;
        self.count = 0;
    }

    /// Feed the current normalized deflection; returns true when the gesture
    /// completes.
    pub fn update(&mut self, deflection: f32, now_ms: u64) -> bool {
        // Rolling timeout between crossings resets an incomplete sequence
        if self.count > 0 && now_ms.saturating_sub(self.last_cross_ms) > self.timeout_ms {
            debug!("Gesture timed out after {} crossings", self.count);
            self.reset();
        }

        let crossed = match self.phase {
            GesturePhase::Idle => {
                if deflection > self.threshold {
                    self.phase = GesturePhase::WaitingNegative;
                    true
                } else if deflection < -self.threshold {
                    self.phase = GesturePhase::WaitingPositive;
                    true
                } else {
                    false
                }
            }
            GesturePhase::WaitingNegative => {
                if deflection < -self.threshold {
                    self.phase = GesturePhase::WaitingPositive;
                    true
                } else {
                    false
                }
            }
            GesturePhase::WaitingPositive => {
                if deflection > self.threshold {
                    self.phase = GesturePhase::WaitingNegative;
                    true
                } else {
                    false
                }
            }
        };

        if crossed {
            self.count += 1;
            self.last_cross_ms = now_ms;
            if self.count >= self.target_count {
                self.reset();
                return true;
            }
        }
        false
    }
}

/// Events produced by one pilot-monitor update.
#[derive(Clone, Copy, Debug, Default)]
pub struct PilotEvents {
    /// A stick is deflected beyond the deadzone
    pub manual_input: bool,
    /// The re-center gesture fired (already gated per episode)
    pub recenter: bool,
}

/// Monitors stick activity, gestures and the resume timer.
pub struct PilotMonitor {
    config: PilotConfig,
    roll_gesture: GestureDetector,
    pitch_gesture: GestureDetector,
    persistent_override: bool,
    recentered_this_episode: bool,
    /// Last time any monitored stick was deflected
    last_input_ms: u64,
}

impl PilotMonitor {
    pub fn new(config: PilotConfig) -> Self {
        Self {
            roll_gesture: GestureDetector::new(&config),
            pitch_gesture: GestureDetector::new(&config),
            persistent_override: false,
            recentered_this_episode: false,
            last_input_ms: 0,
            config,
        }
    }

    /// Process one tick of stick input.
    ///
    /// `override_active` gates the re-center gesture: it is actionable only
    /// while a temporary override episode is running and fires at most once
    /// per episode.
    pub fn update(
        &mut self,
        roll: &RcChannel,
        pitch: &RcChannel,
        now_ms: u64,
        override_active: bool,
    ) -> PilotEvents {
        let mut events = PilotEvents::default();

        if roll.is_active(self.config.deadzone_us) || pitch.is_active(self.config.deadzone_us)
        {
            events.manual_input = true;
            self.last_input_ms = now_ms;
        }

        if !override_active {
            // Episode over: the re-center gesture re-arms
            self.recentered_this_episode = false;
        }

        if self.roll_gesture.update(roll.deflection(), now_ms) {
            self.persistent_override = !self.persistent_override;
            info!(
                "Persistent override {} by roll gesture",
                if self.persistent_override {
                    "engaged"
                } else {
                    "released"
                }
            );
        }

        let pitch_fired = self.pitch_gesture.update(pitch.deflection(), now_ms);
        if pitch_fired && override_active && !self.recentered_this_episode {
            self.recentered_this_episode = true;
            events.recenter = true;
            info!("Area re-center gesture detected");
        }

        events
    }

    /// Whether automatic resumption is currently allowed: sticks neutral for
    /// the resume delay and no persistent override.
    pub fn can_resume(&self, now_ms: u64) -> bool {
        !self.persistent_override
            && now_ms.saturating_sub(self.last_input_ms) >= self.config.resume_delay_ms
    }

    pub fn persistent_override(&self) -> bool {
        self.persistent_override
    }
}
