//! JSON exporter for offline inspection.
//!
//! Exports raw vs conditioned fixes per frame, plus the final path and
//! territory, so a run can be plotted outside the simulator.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use terra_core::{SessionSnapshot, Verdict};
use terra_env::{Fix, GeoPoint};

use crate::error::SimError;
use crate::oracle::{Glitch, ObservedFix};

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Fix timestamp (Unix ms)
    pub time_ms: i64,

    /// Where the player really was
    pub truth: GeoPoint,

    /// What the receiver reported
    pub raw: Fix,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub glitch: Option<Glitch>,

    /// Gate rejection reason, if the gate discarded the fix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gated: Option<String>,

    /// Conditioned estimate after this fix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditioned: Option<Fix>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,

    pub stationary: bool,
    pub appended: bool,
    pub distance_m: f64,
}

impl SimFrame {
    pub fn new(observed: &ObservedFix, snapshot: &SessionSnapshot) -> Self {
        Self {
            time_ms: observed.raw.timestamp_ms,
            truth: observed.truth,
            raw: observed.raw,
            glitch: observed.glitch,
            gated: snapshot.gate_rejection.map(|r| format!("{r:?}")),
            conditioned: snapshot.live.as_ref().map(|c| c.fix),
            verdict: snapshot.live.as_ref().map(|c| c.verdict),
            stationary: snapshot.live.as_ref().map_or(false, |c| c.stationary),
            appended: snapshot.appended,
            distance_m: snapshot.distance_m,
        }
    }

    /// Distance between the conditioned estimate and the truth.
    pub fn error_m(&self) -> Option<f64> {
        self.conditioned
            .map(|c| terra_core::geodesy::distance(c.point(), self.truth))
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames, across every run of the scenario
    pub frames: Vec<SimFrame>,

    /// Final path segments of the last run
    pub segments: Vec<Vec<GeoPoint>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub territory: Option<Vec<GeoPoint>>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            segments: Vec::new(),
            territory: None,
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        if let Some(first) = self.frames.first() {
            self.duration_sec = (frame.time_ms - first.time_ms) as f64 / 1000.0;
        }
        self.frames.push(frame);
    }

    /// Records the final path of a run.
    pub fn set_path(&mut self, segments: Vec<Vec<GeoPoint>>, territory: Option<Vec<GeoPoint>>) {
        self.segments = segments;
        self.territory = territory;
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terra_core::TrackingSession;

    #[test]
    fn test_frame_captures_snapshot() {
        let observed = ObservedFix {
            truth: GeoPoint::new(10.0, 10.0),
            raw: Fix::new(10.0, 10.0001, 5.0, 1_000),
            glitch: None,
        };
        let mut session = TrackingSession::default();
        session.start().unwrap();
        let snapshot = session.ingest(&observed.raw);

        let frame = SimFrame::new(&observed, &snapshot);

        assert_eq!(frame.verdict, Some(Verdict::Accepted));
        assert!(frame.appended);
        assert!(frame.gated.is_none());
        let error = frame.error_m().unwrap();
        assert!(error > 5.0 && error < 15.0, "error = {error}");
    }

    #[test]
    fn test_export_serializes() {
        let mut export = SimExport::new("square_loop", 42);
        export.finalize(true, None);

        let json = serde_json::to_string(&export).unwrap();
        assert!(json.contains("\"scenario\":\"square_loop\""));
        assert!(!json.contains("failure_reason"));
    }
}
