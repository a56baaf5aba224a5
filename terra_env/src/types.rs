//! Common types shared by the engine and its collaborators.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A geographic coordinate in degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both coordinates finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// One reported position from the receiver.
///
/// Raw fixes come from a [`LocationSource`](crate::LocationSource);
/// conditioned fixes produced by the engine share the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// Horizontal accuracy radius in meters (`None` if the receiver gave none)
    pub accuracy_m: Option<f32>,

    /// Unix milliseconds, supplied by the provider
    pub timestamp_ms: i64,

    /// Course over ground in degrees, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f32>,
}

impl Fix {
    /// Creates a fix with a reported accuracy and no bearing.
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f32, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: Some(accuracy_m),
            timestamp_ms,
            bearing: None,
        }
    }

    /// Creates a fix at the given point.
    pub fn at(point: GeoPoint, accuracy_m: f32, timestamp_ms: i64) -> Self {
        Self::new(point.lat, point.lng, accuracy_m, timestamp_ms)
    }

    /// The position component.
    #[inline]
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Identity of a territory owner (a player).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    /// Creates a new random OwnerId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic OwnerId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self(uuid_from_seed(seed))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 chars are enough in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Identity of one recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_seed(seed: u64) -> Self {
        Self(uuid_from_seed(seed))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn uuid_from_seed(seed: u64) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&seed.to_le_bytes());
    bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
    Uuid::from_bytes(bytes)
}

/// A finished run as handed to the run-history store.
///
/// The engine produces it; persisting it is the store's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub owner: OwnerId,

    /// Timestamp of the first fix that reached the session
    pub started_at_ms: i64,

    /// Timestamp of the last fix that reached the session
    pub finished_at_ms: i64,

    /// Total tracked distance in meters (pause gaps excluded)
    pub distance_m: f64,

    /// Path segments, split where a pause broke the path
    pub segments: Vec<Vec<GeoPoint>>,

    /// Enclosed area if the run closed a loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_area_m2: Option<f64>,

    /// Closed ring of the captured territory (first == last)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub territory: Option<Vec<GeoPoint>>,
}

impl RunRecord {
    /// Duration between first and last fix.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at_ms - self.started_at_ms).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_ids_are_stable() {
        assert_eq!(OwnerId::from_seed(7), OwnerId::from_seed(7));
        assert_ne!(OwnerId::from_seed(7), OwnerId::from_seed(8));
        assert_eq!(RunId::from_seed(3), RunId::from_seed(3));
    }

    #[test]
    fn test_point_validity() {
        assert!(GeoPoint::new(51.5, -0.12).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_fix_point_accessor() {
        let fix = Fix::new(1.0, 2.0, 5.0, 1000);
        assert_eq!(fix.point(), GeoPoint::new(1.0, 2.0));
        assert_eq!(fix.bearing, None);
    }
}
