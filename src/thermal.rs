//! Thermal memory: a bounded, time-decaying store of discovered lift.
//!
//! While the host circles in lift, a [`ThermalSampler`] accumulates climb-rate
//! samples at an adaptive cadence. On exit the accumulator collapses into a
//! [`Hotspot`] — strength, consistency and a wind-drift-corrected location —
//! which is kept in [`ThermalMemory`] until it expires or is evicted.

use crate::area::AreaManager;
use crate::config::ThermalConfig;
use crate::geo::{self, Location};
use crate::inputs::Vec2;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Qualitative steadiness of the sampled climb rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consistency {
    /// Low sample variance
    Consistent,
    /// High sample variance
    Variable,
}

/// A remembered lift location.
#[derive(Clone, Debug)]
pub struct Hotspot {
    pub location: Location,
    /// Capture time, host milliseconds
    pub timestamp_ms: u64,
    /// Mean climb rate over the encounter, m/s
    pub avg_strength: f32,
    /// Peak climb rate, m/s
    pub max_strength: f32,
    pub consistency: Consistency,
    /// Time spent in the lift, seconds
    pub duration_s: f32,
    /// Wind vector at capture
    pub wind: Vec2,
}

impl Hotspot {
    /// Age in seconds at `now_ms`.
    pub fn age_s(&self, now_ms: u64) -> f32 {
        now_ms.saturating_sub(self.timestamp_ms) as f32 / 1000.0
    }
}

/// Capacity-bounded hotspot store with lazy expiry.
pub struct ThermalMemory {
    hotspots: Vec<Hotspot>,
    max_hotspots: usize,
    lifetime_s: f32,
}

impl ThermalMemory {
    pub fn new(config: &ThermalConfig) -> Self {
        Self {
            hotspots: Vec::with_capacity(config.max_hotspots),
            max_hotspots: config.max_hotspots,
            lifetime_s: config.hotspot_lifetime_s,
        }
    }

    /// Apply changed limits to the existing store.
    ///
    /// Remembered lift stays valid across a configuration change; a tighter
    /// capacity evicts the weakest entries immediately.
    pub fn reconfigure(&mut self, config: &ThermalConfig) {
        self.max_hotspots = config.max_hotspots;
        self.lifetime_s = config.hotspot_lifetime_s;
        self.evict_over_capacity();
    }

    /// Insert a hotspot, evicting the weakest entry if over capacity.
    pub fn insert(&mut self, hotspot: Hotspot) {
        info!(
            "Hotspot recorded at ({:.5}, {:.5}): avg {:.2} m/s, max {:.2} m/s, {:?}",
            hotspot.location.lat,
            hotspot.location.lon,
            hotspot.avg_strength,
            hotspot.max_strength,
            hotspot.consistency
        );
        self.hotspots.push(hotspot);
        self.evict_over_capacity();
    }

    fn evict_over_capacity(&mut self) {
        while self.hotspots.len() > self.max_hotspots {
            let weakest = self
                .hotspots
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.avg_strength.total_cmp(&b.avg_strength))
                .map(|(i, _)| i)
                .unwrap_or(0);
            let evicted = self.hotspots.swap_remove(weakest);
            debug!(
                "Hotspot store full, evicted weakest (avg {:.2} m/s)",
                evicted.avg_strength
            );
        }
    }

    /// Iterate over hotspots that have not outlived the configured lifetime.
    ///
    /// Expiry is lazy: stale entries are simply excluded from every read.
    pub fn active(&self, now_ms: u64) -> impl Iterator<Item = &Hotspot> {
        let lifetime = self.lifetime_s;
        self.hotspots.iter().filter(move |h| h.age_s(now_ms) < lifetime)
    }

    /// The non-expired hotspot with the highest average strength.
    pub fn strongest(&self, now_ms: u64) -> Option<&Hotspot> {
        self.active(now_ms)
            .max_by(|a, b| a.avg_strength.total_cmp(&b.avg_strength))
    }

    pub fn active_count(&self, now_ms: u64) -> usize {
        self.active(now_ms).count()
    }

    pub fn len(&self) -> usize {
        self.hotspots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hotspots.is_empty()
    }
}

/// Bounded ring of the most recent samples used for variance classification.
const RECENT_SAMPLES: usize = 10;

/// Transient climb-rate accumulator, alive only while circling lift.
pub struct ThermalSampler {
    entry: Location,
    start_ms: u64,
    last_sample_ms: u64,
    sample_count: u32,
    total_strength: f32,
    max_strength: f32,
    recent: VecDeque<f32>,
}

impl ThermalSampler {
    /// Begin sampling at the lift entry point.
    pub fn begin(entry: Location, now_ms: u64) -> Self {
        debug!(
            "Thermal sampling started at ({:.5}, {:.5})",
            entry.lat, entry.lon
        );
        Self {
            entry,
            start_ms: now_ms,
            last_sample_ms: 0,
            sample_count: 0,
            total_strength: 0.0,
            max_strength: 0.0,
            recent: VecDeque::with_capacity(RECENT_SAMPLES),
        }
    }

    /// Sampling interval: inversely proportional to the current peak, held
    /// within 1000–5000 ms. Stronger lift is sampled more often.
    fn interval_ms(&self) -> u64 {
        (5000.0 / self.max_strength.max(1.0)).clamp(1000.0, 5000.0) as u64
    }

    /// Offer a climb-rate reading; recorded only when the adaptive interval
    /// has elapsed.
    pub fn update(&mut self, climb_rate: f32, now_ms: u64) {
        if self.sample_count > 0
            && now_ms.saturating_sub(self.last_sample_ms) < self.interval_ms()
        {
            return;
        }
        self.last_sample_ms = now_ms;
        self.sample_count += 1;
        self.total_strength += climb_rate;
        self.max_strength = self.max_strength.max(climb_rate);
        if self.recent.len() == RECENT_SAMPLES {
            self.recent.pop_front();
        }
        self.recent.push_back(climb_rate);
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Collapse the accumulator into a hotspot.
    ///
    /// Returns `None` when no samples were taken or when the wind-corrected
    /// location falls outside the operational area (logged, not stored).
    pub fn finish(
        self,
        now_ms: u64,
        wind: Vec2,
        area: &AreaManager,
        config: &ThermalConfig,
    ) -> Option<Hotspot> {
        if self.sample_count == 0 {
            debug!("Thermal encounter ended without samples, nothing recorded");
            return None;
        }

        let avg = self.total_strength / self.sample_count as f32;
        let variance = sample_variance(&self.recent);
        let consistency = if variance < config.variance_threshold {
            Consistency::Consistent
        } else {
            Consistency::Variable
        };

        // Wind-drift correction: the lift source sits upwind of where the
        // aircraft first encountered it.
        let location = if wind.speed() > 1.0 {
            let adaptive_time = config.wind_compensation_s * (avg / 1.5).clamp(0.5, 2.0);
            let offset = (wind.speed() * adaptive_time) as f64;
            let upwind = (wind.bearing_deg() + 180.0) % 360.0;
            geo::destination(self.entry, upwind, offset)
        } else {
            self.entry
        };

        if !area.contains(location) {
            info!(
                "Hotspot at ({:.5}, {:.5}) outside operational area, discarded",
                location.lat, location.lon
            );
            return None;
        }

        Some(Hotspot {
            location,
            timestamp_ms: now_ms,
            avg_strength: avg,
            max_strength: self.max_strength,
            consistency,
            duration_s: now_ms.saturating_sub(self.start_ms) as f32 / 1000.0,
            wind,
        })
    }
}

/// Variance of the recent-sample window.
fn sample_variance(samples: &VecDeque<f32>) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / samples.len() as f32
}
