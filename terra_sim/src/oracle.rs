//! Ground truth oracle for simulation.
//!
//! The Oracle knows where the player really is:
//! - True positions along scripted legs (walk, ride, stand still)
//! - Receiver noise (spatially correlated, like real multipath drift)
//! - Injected receiver glitches (null island, teleports, bad accuracy)

use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use terra_core::geodesy;
use terra_env::{Fix, GeoPoint};

/// Receiver noise model.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseModel {
    /// Standard deviation of the position error per axis (meters)
    pub position_std_m: f64,

    /// Step-to-step correlation of the error, in [0, 1)
    pub correlation: f64,

    /// Accuracy the receiver claims on a good fix (meters)
    pub reported_accuracy_m: f64,
}

impl Default for NoiseModel {
    fn default() -> Self {
        Self {
            position_std_m: 2.0,
            correlation: 0.9,
            reported_accuracy_m: 6.0,
        }
    }
}

impl NoiseModel {
    /// Perfect receiver: no error, constant accuracy.
    pub fn none() -> Self {
        Self {
            position_std_m: 0.0,
            correlation: 0.0,
            reported_accuracy_m: 5.0,
        }
    }
}

/// Per-fix probabilities of each receiver glitch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlitchProfile {
    pub null_island: f64,
    pub teleport: f64,
    pub missing_accuracy: f64,
    pub poor_accuracy: f64,
}

impl GlitchProfile {
    /// A hostile receiver.
    pub fn storm() -> Self {
        Self {
            null_island: 0.03,
            teleport: 0.04,
            missing_accuracy: 0.03,
            poor_accuracy: 0.05,
        }
    }
}

/// Which glitch corrupted a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Glitch {
    NullIsland,
    Teleport,
    MissingAccuracy,
    PoorAccuracy,
}

/// True position at one sampling instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruthSample {
    pub time_ms: i64,
    pub point: GeoPoint,
}

/// A raw fix as the receiver would report it, with its ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservedFix {
    pub truth: GeoPoint,
    pub raw: Fix,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub glitch: Option<Glitch>,
}

/// The Oracle - scripts ground truth and generates receiver output.
pub struct Oracle {
    /// Seed for noise and glitches
    physics_seed: u64,

    rng: ChaCha8Rng,

    /// Local metric frame anchor
    origin: GeoPoint,

    /// Current true position, meters [north, east] from origin
    position: Vector2<f64>,

    time_ms: i64,
    sample_interval_ms: i64,
    truth: Vec<TruthSample>,
    noise: NoiseModel,
    glitches: GlitchProfile,
}

impl Oracle {
    /// Creates an Oracle standing at `origin` at `start_ms`, with one truth
    /// sample already recorded.
    pub fn new(physics_seed: u64, origin: GeoPoint, start_ms: i64) -> Self {
        let mut oracle = Self {
            physics_seed,
            rng: ChaCha8Rng::seed_from_u64(physics_seed),
            origin,
            position: Vector2::zeros(),
            time_ms: start_ms,
            sample_interval_ms: 1_000,
            truth: Vec::new(),
            noise: NoiseModel::default(),
            glitches: GlitchProfile::default(),
        };
        oracle.record();
        oracle
    }

    pub fn with_noise(mut self, noise: NoiseModel) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_glitches(mut self, glitches: GlitchProfile) -> Self {
        self.glitches = glitches;
        self
    }

    pub fn physics_seed(&self) -> u64 {
        self.physics_seed
    }

    pub fn time_ms(&self) -> i64 {
        self.time_ms
    }

    /// Current true position.
    pub fn position(&self) -> GeoPoint {
        self.to_geo(self.position)
    }

    pub fn truth(&self) -> &[TruthSample] {
        &self.truth
    }

    /// Converts local metric coordinates [north, east] to a geographic point.
    pub fn to_geo(&self, metric: Vector2<f64>) -> GeoPoint {
        geodesy::offset(self.origin, metric.x, metric.y)
    }

    /// Moves in a straight line to `target` at `speed_mps`, sampling once per
    /// interval.
    pub fn walk_to(&mut self, target: Vector2<f64>, speed_mps: f64) {
        let start = self.position;
        let length = (target - start).norm();
        let step_m = speed_mps * self.sample_interval_ms as f64 / 1000.0;
        let steps = (length / step_m.max(f64::EPSILON)).ceil().max(1.0) as usize;

        for s in 1..=steps {
            self.position = start + (target - start) * (s as f64 / steps as f64);
            self.time_ms += self.sample_interval_ms;
            self.record();
        }
    }

    /// Walks through every waypoint in order.
    pub fn walk_route(&mut self, waypoints: &[Vector2<f64>], speed_mps: f64) {
        for &waypoint in waypoints {
            self.walk_to(waypoint, speed_mps);
        }
    }

    /// Stands still for `duration_ms`.
    pub fn hold(&mut self, duration_ms: i64) {
        let samples = duration_ms / self.sample_interval_ms;
        for _ in 0..samples {
            self.time_ms += self.sample_interval_ms;
            self.record();
        }
    }

    /// Generates the receiver output for every truth sample so far.
    pub fn observe(&mut self) -> Vec<ObservedFix> {
        let std_m = self.noise.position_std_m;
        let normal = (std_m > 0.0).then(|| Normal::new(0.0, std_m).ok()).flatten();
        // Claimed accuracy only wobbles on a noisy receiver
        let unit = normal.as_ref().and_then(|_| Normal::<f64>::new(0.0, 1.0).ok());
        let rho = self.noise.correlation.clamp(0.0, 0.999);
        let innovation_scale = (1.0 - rho * rho).sqrt();

        let mut error = Vector2::<f64>::zeros();
        let samples = self.truth.clone();
        let mut observed = Vec::with_capacity(samples.len());

        for sample in samples {
            if let Some(normal) = &normal {
                let draw = Vector2::new(normal.sample(&mut self.rng), normal.sample(&mut self.rng));
                error = error * rho + draw * innovation_scale;
            }

            let noisy = geodesy::offset(sample.point, error.x, error.y);
            let jitter = unit.as_ref().map_or(0.0, |u| u.sample(&mut self.rng).abs());
            let accuracy = (self.noise.reported_accuracy_m + jitter) as f32;
            let mut raw = Fix::at(noisy, accuracy, sample.time_ms);

            let glitch = self.roll_glitch();
            match glitch {
                Some(Glitch::NullIsland) => {
                    raw.latitude = 0.00001;
                    raw.longitude = -0.00002;
                }
                Some(Glitch::Teleport) => {
                    let heading = self.rng.gen_range(0.0..std::f64::consts::TAU);
                    let jump = self.rng.gen_range(300.0..600.0);
                    let moved = geodesy::offset(noisy, jump * heading.cos(), jump * heading.sin());
                    raw.latitude = moved.lat;
                    raw.longitude = moved.lng;
                }
                Some(Glitch::MissingAccuracy) => raw.accuracy_m = None,
                Some(Glitch::PoorAccuracy) => raw.accuracy_m = Some(self.rng.gen_range(30.0..80.0)),
                None => {}
            }

            observed.push(ObservedFix {
                truth: sample.point,
                raw,
                glitch,
            });
        }

        observed
    }

    fn roll_glitch(&mut self) -> Option<Glitch> {
        let g = &self.glitches;
        let table = [
            (g.null_island, Glitch::NullIsland),
            (g.teleport, Glitch::Teleport),
            (g.missing_accuracy, Glitch::MissingAccuracy),
            (g.poor_accuracy, Glitch::PoorAccuracy),
        ];

        let roll: f64 = self.rng.gen();
        let mut cumulative = 0.0;
        for (rate, glitch) in table {
            cumulative += rate;
            if roll < cumulative {
                return Some(glitch);
            }
        }
        None
    }

    fn record(&mut self) {
        self.truth.push(TruthSample {
            time_ms: self.time_ms,
            point: self.to_geo(self.position),
        });
    }
}

/// Corners of a square walked east, north, west, south, back to the start.
pub fn square_route(side_m: f64, offset: Vector2<f64>) -> Vec<Vector2<f64>> {
    [(0.0, side_m), (side_m, side_m), (side_m, 0.0), (0.0, 0.0)]
        .iter()
        .map(|&(north, east)| offset + Vector2::new(north, east))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: GeoPoint = GeoPoint { lat: 45.0, lng: 7.0 };

    #[test]
    fn test_walk_samples_once_per_second() {
        let mut oracle = Oracle::new(1, ORIGIN, 0);
        oracle.walk_to(Vector2::new(30.0, 0.0), 3.0);

        assert_eq!(oracle.truth().len(), 11);
        assert_eq!(oracle.time_ms(), 10_000);
        assert!((geodesy::distance(ORIGIN, oracle.position()) - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_same_seed_same_observations() {
        let build = || {
            let mut oracle = Oracle::new(42, ORIGIN, 0).with_glitches(GlitchProfile::storm());
            oracle.walk_route(&square_route(50.0, Vector2::zeros()), 3.0);
            oracle.observe()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_noise_free_observation_matches_truth() {
        let mut oracle = Oracle::new(7, ORIGIN, 0).with_noise(NoiseModel::none());
        oracle.walk_to(Vector2::new(0.0, 20.0), 2.0);

        for obs in oracle.observe() {
            assert!(obs.glitch.is_none());
            assert!(geodesy::distance(obs.truth, obs.raw.point()) < 1e-6);
            assert_eq!(obs.raw.accuracy_m, Some(5.0));
        }
    }

    #[test]
    fn test_storm_injects_every_glitch_kind() {
        let mut oracle = Oracle::new(3, ORIGIN, 0).with_glitches(GlitchProfile::storm());
        oracle.hold(600_000);
        let observed = oracle.observe();

        for kind in [Glitch::NullIsland, Glitch::Teleport, Glitch::MissingAccuracy, Glitch::PoorAccuracy] {
            assert!(observed.iter().any(|o| o.glitch == Some(kind)), "{kind:?} never injected");
        }
    }

    #[test]
    fn test_hold_keeps_position() {
        let mut oracle = Oracle::new(1, ORIGIN, 1_000);
        oracle.hold(5_000);
        assert_eq!(oracle.truth().len(), 6);
        assert!(oracle.truth().iter().all(|s| s.point == oracle.position()));
    }
}
