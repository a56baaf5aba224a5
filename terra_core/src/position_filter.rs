//! The scalar position filter.
//!
//! A deliberately simplified Kalman-style estimator: latitude and longitude
//! are independent channels, each carrying its own scalar variance, with a
//! velocity derived from the last innovation. There is no covariance matrix
//! and no cross-axis coupling; the downstream distance thresholds are tuned
//! against exactly this behaviour.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Tuning constants for [`ScalarPositionFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Variance added per second of prediction (default: 0.5)
    pub process_noise: f64,

    /// Time deltas above this are clock anomalies (default: 60 s)
    pub max_dt_secs: f64,

    /// Variance floor as a fraction of measurement accuracy (default: 0.001)
    pub variance_floor_ratio: f64,

    /// Upper bound for decayed variance (default: 100)
    pub max_variance: f64,

    /// Variance multiplier per decay step (default: 1.5)
    pub decay_rate: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.5,
            max_dt_secs: 60.0,
            variance_floor_ratio: 0.001,
            max_variance: 100.0,
            decay_rate: 1.5,
        }
    }
}

/// Per-axis position estimator with a derived velocity.
///
/// Two states: **Uninitialized** (negative variance) until the first
/// measurement, then **Tracking**. Channels are `[lat, lng]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarPositionFilter {
    /// Filtered `[lat, lng]` in degrees
    position: Vector2<f64>,

    /// Derived `[lat, lng]` rate in degrees per second
    velocity: Vector2<f64>,

    /// Per-axis variance; negative means uninitialized
    variance: Vector2<f64>,

    /// Timestamp of the last update (or resync)
    last_timestamp_ms: i64,

    config: FilterConfig,
}

impl Default for ScalarPositionFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

impl ScalarPositionFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            position: Vector2::zeros(),
            velocity: Vector2::zeros(),
            variance: Vector2::repeat(-1.0),
            last_timestamp_ms: 0,
            config,
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// True once the first measurement has been absorbed.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.variance.x >= 0.0
    }

    /// Prediction step: extrapolate position to `timestamp_ms`.
    ///
    /// A non-positive or implausibly long delta is treated as a clock
    /// anomaly: the timestamp is resynced and nothing is extrapolated.
    pub fn predict(&mut self, timestamp_ms: i64) {
        if !self.is_initialized() {
            self.last_timestamp_ms = timestamp_ms;
            return;
        }

        let dt = self.seconds_since_last(timestamp_ms);
        if dt <= 0.0 || dt > self.config.max_dt_secs {
            self.last_timestamp_ms = timestamp_ms;
            return;
        }

        self.position += self.velocity * dt;
        self.variance.add_scalar_mut(self.config.process_noise * dt);
    }

    /// Update step: blend a measurement into the estimate.
    ///
    /// `accuracy` plays the role of measurement variance. The first
    /// measurement initializes the filter without any correction.
    pub fn update(&mut self, measured_lat: f64, measured_lng: f64, accuracy: f64, timestamp_ms: i64) {
        let measured = Vector2::new(measured_lat, measured_lng);

        if !self.is_initialized() {
            self.position = measured;
            self.variance = Vector2::repeat(accuracy);
            self.last_timestamp_ms = timestamp_ms;
            return;
        }

        let dt = self.seconds_since_last(timestamp_ms);

        // g = var / (var + R), per axis
        let gain = self
            .variance
            .component_div(&self.variance.add_scalar(accuracy));
        let innovation = measured - self.position;

        self.position += gain.component_mul(&innovation);

        // Velocity only refreshes on plausible deltas
        if dt > 0.0 && dt < self.config.max_dt_secs {
            self.velocity = innovation / dt;
        }

        // var *= (1 - g), floored so the filter never stops listening
        let floor = accuracy * self.config.variance_floor_ratio;
        self.variance = self
            .variance
            .component_mul(&gain.map(|g| 1.0 - g))
            .map(|v| v.max(floor));

        self.last_timestamp_ms = timestamp_ms;
    }

    /// Inflates both variances by `rate`, capped at the configured maximum.
    ///
    /// Called while fixes are missing so the claimed confidence degrades.
    pub fn decay_confidence(&mut self, rate: f64) {
        if !self.is_initialized() {
            return;
        }
        let cap = self.config.max_variance;
        self.variance = self.variance.map(|v| (v * rate).min(cap));
    }

    /// [`decay_confidence`](Self::decay_confidence) with the configured rate.
    pub fn decay(&mut self) {
        self.decay_confidence(self.config.decay_rate);
    }

    /// [`decay`](Self::decay) applied `steps` times, in constant time.
    ///
    /// Equivalent to repeated steps because the cap is monotone: once
    /// saturated, further steps change nothing.
    pub fn decay_steps(&mut self, steps: i64) {
        if steps <= 0 {
            return;
        }
        let exponent = steps.min(i64::from(i32::MAX)) as i32;
        self.decay_confidence(self.config.decay_rate.powi(exponent));
    }

    /// Back to Uninitialized.
    pub fn reset(&mut self) {
        self.position = Vector2::zeros();
        self.velocity = Vector2::zeros();
        self.variance = Vector2::repeat(-1.0);
        self.last_timestamp_ms = 0;
    }

    #[inline]
    pub fn lat(&self) -> f64 {
        self.position.x
    }

    #[inline]
    pub fn lng(&self) -> f64 {
        self.position.y
    }

    /// Scalar accuracy: mean variance, never below 1.
    pub fn accuracy(&self) -> f64 {
        ((self.variance.x + self.variance.y) / 2.0).max(1.0)
    }

    /// Per-axis variance `[lat, lng]`.
    pub fn variance(&self) -> Vector2<f64> {
        self.variance
    }

    /// Derived velocity `[lat, lng]` in degrees per second.
    pub fn velocity(&self) -> Vector2<f64> {
        self.velocity
    }

    pub fn last_timestamp_ms(&self) -> i64 {
        self.last_timestamp_ms
    }

    fn seconds_since_last(&self, timestamp_ms: i64) -> f64 {
        (timestamp_ms - self.last_timestamp_ms) as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn initialized(lat: f64, lng: f64, accuracy: f64) -> ScalarPositionFilter {
        let mut filter = ScalarPositionFilter::default();
        filter.predict(0);
        filter.update(lat, lng, accuracy, 0);
        filter
    }

    #[test]
    fn test_first_update_initializes_without_correction() {
        let mut filter = ScalarPositionFilter::default();
        assert!(!filter.is_initialized());

        filter.predict(1_000);
        assert_eq!(filter.last_timestamp_ms(), 1_000);

        filter.update(51.5, -0.12, 8.0, 1_000);
        assert!(filter.is_initialized());
        assert_eq!(filter.lat(), 51.5);
        assert_eq!(filter.lng(), -0.12);
        assert_eq!(filter.variance(), Vector2::new(8.0, 8.0));
        assert_eq!(filter.accuracy(), 8.0);
    }

    #[test]
    fn test_gain_pulls_toward_measurement() {
        let mut filter = initialized(0.0, 0.0, 5.0);

        filter.predict(1_000); // var 5.0 -> 5.5
        filter.update(1.0, 2.0, 5.5, 1_000);

        // g = 5.5 / 11 = 0.5 on both axes
        assert_relative_eq!(filter.lat(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(filter.lng(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(filter.variance().x, 2.75, epsilon = 1e-12);

        // Innovation over one second
        assert_relative_eq!(filter.velocity().x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(filter.velocity().y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_predict_extrapolates_with_velocity() {
        let mut filter = initialized(0.0, 0.0, 5.0);
        filter.predict(1_000);
        filter.update(1.0, 1.0, 5.5, 1_000);
        let lat_before = filter.lat();
        let var_before = filter.variance().x;

        filter.predict(3_000);

        assert_relative_eq!(filter.lat(), lat_before + 2.0 * filter.velocity().x, epsilon = 1e-12);
        assert_relative_eq!(filter.variance().x, var_before + 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_time_anomaly_resyncs_without_extrapolating() {
        let mut filter = initialized(0.0, 0.0, 5.0);
        filter.predict(1_000);
        filter.update(1.0, 1.0, 5.5, 1_000);
        let snapshot = (filter.lat(), filter.lng(), filter.variance());

        // Backwards in time
        filter.predict(500);
        assert_eq!((filter.lat(), filter.lng(), filter.variance()), snapshot);
        assert_eq!(filter.last_timestamp_ms(), 500);

        // Gap longer than a minute
        filter.predict(500 + 61_000);
        assert_eq!((filter.lat(), filter.lng(), filter.variance()), snapshot);
        assert_eq!(filter.last_timestamp_ms(), 61_500);
    }

    #[test]
    fn test_velocity_skipped_on_duplicate_timestamp() {
        let mut filter = initialized(0.0, 0.0, 5.0);
        filter.update(1.0, 1.0, 5.0, 0);

        assert_eq!(filter.velocity(), Vector2::zeros());
        assert!(filter.lat() > 0.0);
    }

    #[test]
    fn test_velocity_skipped_after_long_gap() {
        let mut filter = initialized(0.0, 0.0, 5.0);
        filter.predict(1_000);
        filter.update(1.0, 1.0, 5.5, 1_000);
        let velocity = filter.velocity();

        // 60 s without a fix: the measurement is absorbed, the stale delta is not
        filter.predict(61_000);
        filter.update(3.0, 3.0, 5.0, 61_000);

        assert_eq!(filter.velocity(), velocity);
        assert!(filter.lat() > 1.0);
    }

    #[test]
    fn test_variance_floor() {
        let mut filter = initialized(0.0, 0.0, 5.0);
        for _ in 0..200 {
            filter.update(0.0, 0.0, 5.0, 0);
        }
        assert!(filter.variance().x >= 5.0 * 0.001);
        assert!(filter.variance().y >= 5.0 * 0.001);
    }

    #[test]
    fn test_decay_caps_variance() {
        let mut filter = initialized(0.0, 0.0, 10.0);
        filter.decay_confidence(1.5);
        assert_relative_eq!(filter.variance().x, 15.0, epsilon = 1e-12);

        for _ in 0..20 {
            filter.decay();
        }
        assert_eq!(filter.variance(), Vector2::new(100.0, 100.0));
        assert_eq!(filter.accuracy(), 100.0);
    }

    #[test]
    fn test_decay_steps_matches_repeated_decay() {
        let mut stepped = initialized(0.0, 0.0, 2.0);
        let mut bulk = stepped.clone();
        for _ in 0..6 {
            stepped.decay();
        }
        bulk.decay_steps(6);
        assert_relative_eq!(bulk.variance().x, stepped.variance().x, epsilon = 1e-9);

        bulk.decay_steps(i64::MAX);
        assert_eq!(bulk.variance(), Vector2::new(100.0, 100.0));

        bulk.decay_steps(-3);
        assert_eq!(bulk.variance(), Vector2::new(100.0, 100.0));
    }

    #[test]
    fn test_decay_is_noop_when_uninitialized() {
        let mut filter = ScalarPositionFilter::default();
        filter.decay();
        assert!(!filter.is_initialized());
    }

    #[test]
    fn test_reset_returns_to_uninitialized() {
        let mut filter = initialized(10.0, 20.0, 5.0);
        filter.predict(1_000);
        filter.update(10.1, 20.1, 5.0, 1_000);

        filter.reset();

        assert!(!filter.is_initialized());
        assert_eq!(filter.velocity(), Vector2::zeros());
        assert_eq!(filter.last_timestamp_ms(), 0);
    }

    proptest! {
        #[test]
        fn prop_accuracy_stays_non_negative(
            steps in proptest::collection::vec(
                (-0.0005f64..0.0005, -0.0005f64..0.0005, 0.0f64..20.0, 1i64..5_000),
                1..200,
            )
        ) {
            let mut filter = ScalarPositionFilter::default();
            let mut t = 0i64;
            for (dlat, dlng, accuracy, dt) in steps {
                t += dt;
                filter.predict(t);
                filter.update(48.0 + dlat, 11.0 + dlng, accuracy.max(5.0), t);
                prop_assert!(filter.accuracy() >= 0.0);
                prop_assert!(filter.lat().is_finite() && filter.lng().is_finite());
            }
        }
    }
}
