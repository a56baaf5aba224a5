//! Provider-boundary gate.
//!
//! Throws away the two receiver artifacts that must never reach the
//! conditioner: the "null island" fix emitted during receiver warm-up, and
//! gross teleports far larger than anything the reporting cadence allows.

use serde::{Deserialize, Serialize};
use terra_env::Fix;
use tracing::debug;

use crate::geodesy;

/// Configuration for [`FixGate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Fixes with both |lat| and |lng| below this are null-island artifacts
    pub null_island_epsilon_deg: f64,

    /// Largest plausible jump within one reporting interval (default: 150 m)
    pub max_jump_m: f64,

    /// Provider reporting interval (default: 2000 ms)
    pub reporting_interval_ms: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            null_island_epsilon_deg: 0.0001,
            max_jump_m: 150.0,
            reporting_interval_ms: 2_000,
        }
    }
}

/// Why the gate discarded a fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateRejection {
    NullIsland,
    NonFinite,
    /// Jump distance in meters and the time it supposedly took
    Teleport { jump_m: f64, dt_ms: i64 },
}

/// Stateful pre-filter in front of the [`SignalConditioner`](crate::SignalConditioner).
#[derive(Debug, Clone, Default)]
pub struct FixGate {
    config: GateConfig,
    last_valid: Option<Fix>,
}

impl FixGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            last_valid: None,
        }
    }

    /// Checks a raw fix, remembering it as the last valid point on success.
    pub fn admit(&mut self, fix: &Fix) -> Result<(), GateRejection> {
        let verdict = self.check(fix);
        match verdict {
            Ok(()) => self.last_valid = Some(*fix),
            Err(reason) => debug!(?reason, ts = fix.timestamp_ms, "gate discarded fix"),
        }
        verdict
    }

    fn check(&self, fix: &Fix) -> Result<(), GateRejection> {
        if !fix.point().is_valid() {
            return Err(GateRejection::NonFinite);
        }

        let eps = self.config.null_island_epsilon_deg;
        if fix.latitude.abs() < eps && fix.longitude.abs() < eps {
            return Err(GateRejection::NullIsland);
        }

        if let Some(last) = &self.last_valid {
            let dt_ms = fix.timestamp_ms - last.timestamp_ms;
            let jump_m = geodesy::distance(last.point(), fix.point());
            if jump_m > self.config.max_jump_m && dt_ms < self.config.reporting_interval_ms {
                return Err(GateRejection::Teleport { jump_m, dt_ms });
            }
        }

        Ok(())
    }

    pub fn last_valid(&self) -> Option<&Fix> {
        self.last_valid.as_ref()
    }

    pub fn reset(&mut self) {
        self.last_valid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::offset;
    use terra_env::GeoPoint;

    const ORIGIN: GeoPoint = GeoPoint { lat: 40.0, lng: -3.7 };

    #[test]
    fn test_null_island_discarded() {
        let mut gate = FixGate::default();
        let fix = Fix::new(0.00005, -0.00002, 5.0, 1_000);

        assert_eq!(gate.admit(&fix), Err(GateRejection::NullIsland));
        assert!(gate.last_valid().is_none());
    }

    #[test]
    fn test_equator_but_not_null_island_passes() {
        let mut gate = FixGate::default();
        assert!(gate.admit(&Fix::new(0.00005, 0.5, 5.0, 1_000)).is_ok());
    }

    #[test]
    fn test_teleport_within_interval_discarded() {
        let mut gate = FixGate::default();
        gate.admit(&Fix::at(ORIGIN, 5.0, 0)).unwrap();

        let far = Fix::at(offset(ORIGIN, 400.0, 0.0), 5.0, 1_000);
        assert!(matches!(gate.admit(&far), Err(GateRejection::Teleport { .. })));

        // Last valid point unchanged
        assert_eq!(gate.last_valid().map(|f| f.timestamp_ms), Some(0));
    }

    #[test]
    fn test_large_jump_after_long_gap_accepted() {
        let mut gate = FixGate::default();
        gate.admit(&Fix::at(ORIGIN, 5.0, 0)).unwrap();

        let far = Fix::at(offset(ORIGIN, 400.0, 0.0), 5.0, 30_000);
        assert!(gate.admit(&far).is_ok());
    }

    #[test]
    fn test_reset_forgets_last_valid() {
        let mut gate = FixGate::default();
        gate.admit(&Fix::at(ORIGIN, 5.0, 0)).unwrap();
        gate.reset();

        let far = Fix::at(offset(ORIGIN, 400.0, 0.0), 5.0, 500);
        assert!(gate.admit(&far).is_ok());
    }
}
