//! The signal conditioner.
//!
//! Turns the raw receiver stream into one trustworthy estimate per fix.
//! Stages run in a fixed order and any of them may short-circuit:
//! 1. Signal-loss decay (confidence degrades while fixes are missing)
//! 2. Impossible-speed rejection against the last accepted raw fix
//! 3. Accuracy gate
//! 4. Velocity plausibility against the last conditioned output
//! 5. Filter predict + update
//! 6. Anchor deadband
//! 7. Stationary lock
//! 8. Output with bearing
//!
//! A rejected fix never touches the filter; the previous output is repeated
//! so callers always hold a usable estimate.

use serde::{Deserialize, Serialize};
use terra_env::{Fix, GeoPoint};
use tracing::debug;

use crate::geodesy;
use crate::position_filter::{FilterConfig, ScalarPositionFilter};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Thresholds for the [`SignalConditioner`] pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionerConfig {
    /// Silence longer than this starts confidence decay (default: 3000 ms)
    pub signal_loss_after_ms: i64,

    /// Raw-to-raw speed above this is impossible (default: 25 m/s)
    pub max_raw_speed_mps: f64,

    /// Continuous speed rejections longer than this are accepted as a mode
    /// change, e.g. boarding a vehicle (default: 10 000 ms)
    pub sustained_rejection_ms: i64,

    /// Worst accepted receiver accuracy (default: 20 m)
    pub max_accuracy_m: f32,

    /// Output-to-raw speed above this is implausible (default: 20 m/s)
    pub max_output_speed_mps: f64,

    /// Accuracy handed to the filter is never below this (default: 5 m)
    pub min_measurement_accuracy_m: f64,

    /// Minimum movement before the anchor follows (default: 10 m)
    pub anchor_deadband_m: f64,

    /// Movement below this counts as standing still (default: 2 m)
    pub stationary_radius_m: f64,

    /// Standing still this long engages the lock (default: 5000 ms)
    pub stationary_lock_ms: i64,

    /// Accuracy reported while locked (default: 1 m)
    pub locked_accuracy_m: f32,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            signal_loss_after_ms: 3_000,
            max_raw_speed_mps: 25.0,
            sustained_rejection_ms: 10_000,
            max_accuracy_m: 20.0,
            max_output_speed_mps: 20.0,
            min_measurement_accuracy_m: 5.0,
            anchor_deadband_m: 10.0,
            stationary_radius_m: 2.0,
            stationary_lock_ms: 5_000,
            locked_accuracy_m: 1.0,
        }
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Why a raw fix was not absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Rejection {
    /// Implied speed from the last accepted raw fix
    ImpossibleSpeed { speed_mps: f64 },
    MissingAccuracy,
    PoorAccuracy { accuracy_m: f32 },
    /// Implied speed from the last conditioned output
    ImplausibleVelocity { speed_mps: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    Accepted,
    Rejected(Rejection),
}

/// One output of the conditioner.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionedFix {
    /// Current best estimate
    pub fix: Fix,

    /// Whether the raw input was absorbed or the previous estimate repeated
    pub verdict: Verdict,

    /// Output is the frozen stationary position
    pub stationary: bool,

    /// Filtered point has not left the anchor's deadband; the path tracker
    /// does not extend the path with such points
    pub(crate) within_deadband: bool,
}

impl ConditionedFix {
    /// An accepted fix outside any deadband.
    pub fn new(fix: Fix) -> Self {
        Self {
            fix,
            verdict: Verdict::Accepted,
            stationary: false,
            within_deadband: false,
        }
    }

    #[inline]
    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accepted
    }

    #[inline]
    pub fn point(&self) -> GeoPoint {
        self.fix.point()
    }
}

// ============================================================================
// STATIONARY LOCK
// ============================================================================

#[derive(Debug, Clone, Default)]
struct StationaryLock {
    /// When near-zero movement started
    since_ms: Option<i64>,

    /// Position held while locked
    frozen: Option<GeoPoint>,
}

impl StationaryLock {
    /// Feeds one filtered point; returns the frozen position while locked.
    fn observe(
        &mut self,
        filtered: GeoPoint,
        previous_output: Option<GeoPoint>,
        timestamp_ms: i64,
        config: &ConditionerConfig,
    ) -> Option<GeoPoint> {
        let still = previous_output
            .map(|prev| geodesy::distance(filtered, prev) < config.stationary_radius_m)
            .unwrap_or(false);

        if !still {
            self.since_ms = None;
            self.frozen = None;
            return None;
        }

        let since = *self.since_ms.get_or_insert(timestamp_ms);
        if self.frozen.is_none() && timestamp_ms - since >= config.stationary_lock_ms {
            self.frozen = Some(filtered);
        }
        self.frozen
    }

    fn is_locked(&self) -> bool {
        self.frozen.is_some()
    }
}

// ============================================================================
// SIGNAL CONDITIONER
// ============================================================================

/// Sequential conditioning pipeline for one tracking session.
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    config: ConditionerConfig,
    filter: ScalarPositionFilter,

    /// Last raw fix absorbed by the filter (speed check reference)
    last_accepted_raw: Option<Fix>,

    /// Time of the last successful filter update
    last_update_ms: Option<i64>,

    /// Whole seconds of silence already turned into decay steps
    decayed_secs: i64,

    /// Start of the current run of impossible-speed rejections
    rejecting_since_ms: Option<i64>,

    last_output: Option<ConditionedFix>,
    anchor: Option<GeoPoint>,
    stationary: StationaryLock,
}

impl Default for SignalConditioner {
    fn default() -> Self {
        Self::new(ConditionerConfig::default(), FilterConfig::default())
    }
}

impl SignalConditioner {
    pub fn new(config: ConditionerConfig, filter_config: FilterConfig) -> Self {
        Self {
            config,
            filter: ScalarPositionFilter::new(filter_config),
            last_accepted_raw: None,
            last_update_ms: None,
            decayed_secs: 0,
            rejecting_since_ms: None,
            last_output: None,
            anchor: None,
            stationary: StationaryLock::default(),
        }
    }

    /// Runs one raw fix through the pipeline.
    ///
    /// Returns `None` only while no fix has ever been accepted; afterwards a
    /// rejected fix yields the previous estimate again, marked `Rejected`.
    pub fn process(&mut self, raw: &Fix) -> Option<ConditionedFix> {
        let ts = raw.timestamp_ms;

        // Stage 1: signal-loss decay
        self.decay_for_signal_loss(ts);

        // Stage 2: impossible speed vs last accepted raw fix
        let mut mode_change = false;
        if let Some(speed_mps) = self.raw_speed(raw) {
            if speed_mps > self.config.max_raw_speed_mps {
                let since = *self.rejecting_since_ms.get_or_insert(ts);
                if ts - since > self.config.sustained_rejection_ms {
                    debug!(speed_mps, "sustained high speed, accepting as mode change");
                    self.rejecting_since_ms = None;
                    mode_change = true;
                } else {
                    return self.reject(Rejection::ImpossibleSpeed { speed_mps }, ts);
                }
            } else {
                self.rejecting_since_ms = None;
            }
        }

        // Stage 3: accuracy gate
        let accuracy_m = match raw.accuracy_m {
            None => return self.reject(Rejection::MissingAccuracy, ts),
            Some(a) if a.is_nan() || a > self.config.max_accuracy_m => {
                return self.reject(Rejection::PoorAccuracy { accuracy_m: a }, ts);
            }
            Some(a) => a,
        };

        // Stage 4: velocity plausibility vs last output
        if !mode_change {
            if let Some(speed_mps) = self.output_speed(raw) {
                if speed_mps > self.config.max_output_speed_mps {
                    return self.reject(Rejection::ImplausibleVelocity { speed_mps }, ts);
                }
            }
        }

        // Stage 5: filter
        let measurement_accuracy = f64::from(accuracy_m).max(self.config.min_measurement_accuracy_m);
        self.filter.predict(ts);
        self.filter.update(raw.latitude, raw.longitude, measurement_accuracy, ts);
        self.last_accepted_raw = Some(*raw);
        self.last_update_ms = Some(ts);
        self.decayed_secs = 0;

        let filtered = GeoPoint::new(self.filter.lat(), self.filter.lng());

        // Stage 6: anchor deadband
        let within_deadband = match self.anchor {
            Some(anchor) if geodesy::distance(filtered, anchor) < self.config.anchor_deadband_m => true,
            _ => {
                self.anchor = Some(filtered);
                false
            }
        };

        // Stage 7: stationary lock
        let previous = self.last_output.as_ref().map(|o| o.fix);
        let frozen = self
            .stationary
            .observe(filtered, previous.map(|p| p.point()), ts, &self.config);

        let output = match frozen {
            Some(frozen) => ConditionedFix {
                fix: Fix {
                    latitude: frozen.lat,
                    longitude: frozen.lng,
                    accuracy_m: Some(self.config.locked_accuracy_m),
                    timestamp_ms: ts,
                    bearing: previous.and_then(|p| p.bearing),
                },
                verdict: Verdict::Accepted,
                stationary: true,
                within_deadband,
            },
            // Stage 8: filter estimate with bearing from the previous output
            None => {
                let bearing = match previous {
                    Some(prev) if prev.point() != filtered => {
                        Some(geodesy::bearing(prev.point(), filtered) as f32)
                    }
                    Some(prev) => prev.bearing,
                    None => raw.bearing,
                };
                ConditionedFix {
                    fix: Fix {
                        latitude: filtered.lat,
                        longitude: filtered.lng,
                        accuracy_m: Some(self.filter.accuracy() as f32),
                        timestamp_ms: ts,
                        bearing,
                    },
                    verdict: Verdict::Accepted,
                    stationary: false,
                    within_deadband,
                }
            }
        };

        self.last_output = Some(output.clone());
        Some(output)
    }

    /// Clears all state, including the filter.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.last_accepted_raw = None;
        self.last_update_ms = None;
        self.decayed_secs = 0;
        self.rejecting_since_ms = None;
        self.last_output = None;
        self.anchor = None;
        self.stationary = StationaryLock::default();
    }

    pub fn config(&self) -> &ConditionerConfig {
        &self.config
    }

    pub fn filter(&self) -> &ScalarPositionFilter {
        &self.filter
    }

    pub fn last_output(&self) -> Option<&ConditionedFix> {
        self.last_output.as_ref()
    }

    pub fn anchor(&self) -> Option<GeoPoint> {
        self.anchor
    }

    pub fn is_stationary(&self) -> bool {
        self.stationary.is_locked()
    }

    // ========== Private Helper Methods ==========

    fn reject(&self, rejection: Rejection, ts: i64) -> Option<ConditionedFix> {
        debug!(?rejection, ts, "fix rejected");
        self.last_output.as_ref().map(|prev| ConditionedFix {
            fix: prev.fix,
            verdict: Verdict::Rejected(rejection),
            stationary: prev.stationary,
            // A repeated estimate has not moved anywhere
            within_deadband: true,
        })
    }

    fn decay_for_signal_loss(&mut self, ts: i64) {
        let Some(last) = self.last_update_ms else {
            return;
        };
        let silence_ms = ts - last;
        if silence_ms <= self.config.signal_loss_after_ms {
            return;
        }

        let whole_secs = silence_ms / 1000;
        self.filter.decay_steps(whole_secs - self.decayed_secs);
        self.decayed_secs = self.decayed_secs.max(whole_secs);
    }

    fn raw_speed(&self, raw: &Fix) -> Option<f64> {
        let last = self.last_accepted_raw.as_ref()?;
        speed_between(last, raw)
    }

    fn output_speed(&self, raw: &Fix) -> Option<f64> {
        let last = self.last_output.as_ref()?;
        speed_between(&last.fix, raw)
    }
}

/// Implied speed in m/s; `None` when no time has passed.
fn speed_between(from: &Fix, to: &Fix) -> Option<f64> {
    let dt = (to.timestamp_ms - from.timestamp_ms) as f64 / 1000.0;
    if dt <= 0.0 {
        return None;
    }
    Some(geodesy::distance(from.point(), to.point()) / dt)
}
