//! One tracking session: gate, conditioner and tracker wired in order.
//!
//! ```text
//! raw fix ──► FixGate ──► SignalConditioner ──► PathTracker
//!                                                    │
//!                               finish() ──► TerritoryEngine ──► RunSummary
//! ```
//!
//! All stages share the session's lifetime and are reset together.

use serde::{Deserialize, Serialize};
use terra_env::{Fix, GeoPoint, OwnerId, RunId, RunRecord};
use tracing::info;

use crate::config::EngineConfig;
use crate::fix_gate::{FixGate, GateRejection};
use crate::path_tracker::{PathSegment, PathTracker, ResumeOutcome, TrackerError};
use crate::signal_conditioner::{ConditionedFix, SignalConditioner};
use crate::territory::{TerritoryEngine, TerritoryPolygon};

/// Counters over everything a session has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Raw fixes handed to [`TrackingSession::ingest`]
    pub received: u64,

    /// Discarded by the gate
    pub gated: u64,

    /// Rejected by the conditioner
    pub rejected: u64,

    /// Extended the path
    pub appended: u64,
}

/// State visible to the UI after one ingested fix.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Latest conditioned estimate ("you are here")
    pub live: Option<ConditionedFix>,

    /// Set when the gate discarded this fix
    pub gate_rejection: Option<GateRejection>,

    pub distance_m: f64,
    pub segment_count: usize,
    pub is_tracking: bool,
    pub is_paused: bool,

    /// Whether this fix extended the path
    pub appended: bool,
}

/// How the captured territory was found.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LoopSource {
    /// A whole segment ends where it started
    ClosedSegment { segment: usize },

    /// The best enclosed loop inside a segment
    BestLoop { segment: usize, start: usize, end: usize },
}

/// Final result of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
    pub segments: Vec<PathSegment>,
    pub distance_m: f64,
    pub paused_ms: i64,

    /// Some segment ends within closure distance of its start
    pub closed_loop: bool,

    pub captured_area_m2: Option<f64>,
    pub territory: Option<TerritoryPolygon>,
    pub loop_source: Option<LoopSource>,
    pub stats: SessionStats,
}

impl RunSummary {
    /// The record handed to the run-history store.
    pub fn into_record(self, id: RunId, owner: OwnerId) -> RunRecord {
        RunRecord {
            id,
            owner,
            started_at_ms: self.started_at_ms.unwrap_or(0),
            finished_at_ms: self.finished_at_ms.or(self.started_at_ms).unwrap_or(0),
            distance_m: self.distance_m,
            segments: self.segments,
            captured_area_m2: self.captured_area_m2,
            territory: self.territory.map(|t| t.exterior),
        }
    }
}

/// Single-consumer pipeline for one run.
#[derive(Debug, Clone, Default)]
pub struct TrackingSession {
    gate: FixGate,
    conditioner: SignalConditioner,
    tracker: PathTracker,
    territory: TerritoryEngine,
    first_fix_ms: Option<i64>,
    last_fix_ms: Option<i64>,
    stats: SessionStats,
}

impl TrackingSession {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            gate: FixGate::new(config.gate.clone()),
            conditioner: SignalConditioner::new(config.conditioner.clone(), config.filter.clone()),
            tracker: PathTracker::new(config.tracker.clone()),
            territory: TerritoryEngine::new(config.territory.clone()),
            first_fix_ms: None,
            last_fix_ms: None,
            stats: SessionStats::default(),
        }
    }

    /// Processes one raw fix end to end.
    pub fn ingest(&mut self, raw: &Fix) -> SessionSnapshot {
        self.stats.received += 1;
        self.first_fix_ms.get_or_insert(raw.timestamp_ms);
        self.last_fix_ms = Some(raw.timestamp_ms);

        if let Err(rejection) = self.gate.admit(raw) {
            self.stats.gated += 1;
            let live = self.conditioner.last_output().cloned();
            return self.snapshot(live, Some(rejection), false);
        }

        let conditioned = self.conditioner.process(raw);
        let appended = match &conditioned {
            Some(fix) => {
                if !fix.is_accepted() {
                    self.stats.rejected += 1;
                }
                self.tracker.on_conditioned_fix(fix)
            }
            None => {
                self.stats.rejected += 1;
                false
            }
        };
        if appended {
            self.stats.appended += 1;
        }

        self.snapshot(conditioned, None, appended)
    }

    pub fn start(&mut self) -> Result<(), TrackerError> {
        self.tracker.start()
    }

    pub fn pause(&mut self, now_ms: i64) -> Result<(), TrackerError> {
        self.tracker.pause(now_ms)
    }

    pub fn resume(&mut self, now_ms: i64) -> Result<ResumeOutcome, TrackerError> {
        self.tracker.resume(now_ms)
    }

    /// Seeds the path from a saved in-progress run.
    pub fn continue_from(&mut self, points: Vec<GeoPoint>, distance_m: f64) {
        self.tracker.continue_from(points, distance_m);
    }

    /// Stops tracking and evaluates the captured territory.
    pub fn finish(&mut self) -> RunSummary {
        self.tracker.stop();

        let segments = self.tracker.segments().to_vec();
        let closed_loop = segments.iter().any(|s| self.territory.is_closed_loop(s));
        let capture = self.closed_segment_capture(&segments).or_else(|| self.best_loop_capture(&segments));

        let (captured_area_m2, territory, loop_source) = match capture {
            Some((area, ring, source)) => (Some(area), Some(TerritoryPolygon::from_ring(&ring)), Some(source)),
            None => (None, None, None),
        };

        let summary = RunSummary {
            started_at_ms: self.first_fix_ms,
            finished_at_ms: self.last_fix_ms,
            segments,
            distance_m: self.tracker.total_distance_m(),
            paused_ms: self.tracker.track().paused_ms,
            closed_loop,
            captured_area_m2,
            territory,
            loop_source,
            stats: self.stats,
        };

        info!(
            distance_m = summary.distance_m,
            closed_loop = summary.closed_loop,
            area_m2 = summary.captured_area_m2.unwrap_or(0.0),
            "session finished"
        );
        summary
    }

    /// Clears every stage so nothing leaks into the next session.
    pub fn reset(&mut self) {
        self.gate.reset();
        self.conditioner.reset();
        self.tracker.reset();
        self.first_fix_ms = None;
        self.last_fix_ms = None;
        self.stats = SessionStats::default();
    }

    pub fn gate(&self) -> &FixGate {
        &self.gate
    }

    pub fn conditioner(&self) -> &SignalConditioner {
        &self.conditioner
    }

    pub fn tracker(&self) -> &PathTracker {
        &self.tracker
    }

    pub fn territory_engine(&self) -> &TerritoryEngine {
        &self.territory
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    // ========== Private Helper Methods ==========

    fn snapshot(
        &self,
        live: Option<ConditionedFix>,
        gate_rejection: Option<GateRejection>,
        appended: bool,
    ) -> SessionSnapshot {
        SessionSnapshot {
            live,
            gate_rejection,
            distance_m: self.tracker.total_distance_m(),
            segment_count: self.tracker.segments().len(),
            is_tracking: self.tracker.is_tracking(),
            is_paused: self.tracker.is_paused(),
            appended,
        }
    }

    /// Largest closed segment whose area clears the noise floor.
    fn closed_segment_capture(&self, segments: &[PathSegment]) -> Option<(f64, Vec<GeoPoint>, LoopSource)> {
        let floor = self.territory.config().min_loop_area_m2;
        segments
            .iter()
            .enumerate()
            .filter(|(_, s)| self.territory.is_closed_loop(s))
            .map(|(index, s)| (self.territory.captured_area(s), index))
            .filter(|(area, _)| *area > floor)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(area, index)| {
                (area, segments[index].clone(), LoopSource::ClosedSegment { segment: index })
            })
    }

    /// Largest loop found inside any single segment.
    fn best_loop_capture(&self, segments: &[PathSegment]) -> Option<(f64, Vec<GeoPoint>, LoopSource)> {
        segments
            .iter()
            .enumerate()
            .filter_map(|(index, s)| {
                self.territory
                    .find_largest_loop_default(s)
                    .map(|capture| (index, capture))
            })
            .max_by(|a, b| a.1.area_m2.total_cmp(&b.1.area_m2))
            .map(|(index, capture)| {
                let ring = capture.points(&segments[index]).to_vec();
                let source = LoopSource::BestLoop {
                    segment: index,
                    start: capture.start,
                    end: capture.end,
                };
                (capture.area_m2, ring, source)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::offset;

    const ORIGIN: GeoPoint = GeoPoint { lat: 35.6762, lng: 139.6503 };

    /// 1 Hz fixes along metric (north, east) waypoints at about `speed` m/s.
    fn walk(waypoints: &[(f64, f64)], speed: f64, start_ms: i64) -> Vec<Fix> {
        let (n0, e0) = waypoints[0];
        let mut fixes = vec![Fix::at(offset(ORIGIN, n0, e0), 5.0, start_ms)];
        let mut t = start_ms;

        for pair in waypoints.windows(2) {
            let ((n0, e0), (n1, e1)) = (pair[0], pair[1]);
            let length = ((n1 - n0).powi(2) + (e1 - e0).powi(2)).sqrt();
            let steps = (length / speed).ceil().max(1.0) as usize;
            for s in 1..=steps {
                let f = s as f64 / steps as f64;
                t += 1_000;
                fixes.push(Fix::at(offset(ORIGIN, n0 + (n1 - n0) * f, e0 + (e1 - e0) * f), 5.0, t));
            }
        }
        fixes
    }

    fn run(session: &mut TrackingSession, fixes: &[Fix]) {
        for fix in fixes {
            session.ingest(fix);
        }
    }

    #[test]
    fn test_gate_discards_before_conditioner() {
        let mut session = TrackingSession::default();
        session.start().unwrap();

        let snapshot = session.ingest(&Fix::new(0.0, 0.0, 5.0, 0));

        assert_eq!(snapshot.gate_rejection, Some(GateRejection::NullIsland));
        assert!(snapshot.live.is_none());
        assert!(session.conditioner().last_output().is_none());
        assert_eq!(session.stats().gated, 1);
    }

    #[test]
    fn test_square_walk_captures_territory() {
        let mut session = TrackingSession::default();
        session.start().unwrap();

        let square = [(0.0, 0.0), (0.0, 100.0), (100.0, 100.0), (100.0, 0.0), (0.0, 0.0)];
        run(&mut session, &walk(&square, 3.0, 1_000));

        let summary = session.finish();

        assert!(summary.closed_loop);
        assert_eq!(summary.loop_source, Some(LoopSource::ClosedSegment { segment: 0 }));
        let area = summary.captured_area_m2.unwrap();
        assert!(area > 9_000.0 && area < 10_500.0, "area = {area}");
        assert!(summary.distance_m > 330.0 && summary.distance_m < 420.0);

        let territory = summary.territory.unwrap();
        assert_eq!(territory.exterior.first(), territory.exterior.last());
        assert!(!session.tracker().is_tracking());
    }

    #[test]
    fn test_lasso_falls_back_to_best_loop() {
        let mut session = TrackingSession::default();
        session.start().unwrap();

        // Out along a street, around a block, back across the street, away
        let lasso = [
            (0.0, 0.0),
            (0.0, 100.0),
            (60.0, 100.0),
            (60.0, 40.0),
            (0.0, 40.0),
            (-100.0, 40.0),
        ];
        run(&mut session, &walk(&lasso, 3.0, 0));

        let summary = session.finish();

        assert!(!summary.closed_loop);
        assert!(matches!(summary.loop_source, Some(LoopSource::BestLoop { segment: 0, .. })));
        let area = summary.captured_area_m2.unwrap();
        assert!(area > 2_500.0 && area < 4_500.0, "area = {area}");
    }

    #[test]
    fn test_straight_walk_captures_nothing() {
        let mut session = TrackingSession::default();
        session.start().unwrap();
        run(&mut session, &walk(&[(0.0, 0.0), (300.0, 0.0)], 3.0, 0));

        let summary = session.finish();
        assert!(!summary.closed_loop);
        assert!(summary.captured_area_m2.is_none());
        assert!(summary.territory.is_none());
    }

    #[test]
    fn test_pause_and_resume_through_session() {
        let mut session = TrackingSession::default();
        session.start().unwrap();

        let out = walk(&[(0.0, 0.0), (60.0, 0.0)], 3.0, 0);
        let resume_at = out.last().map(|f| f.timestamp_ms).unwrap_or(0);
        run(&mut session, &out);
        session.pause(resume_at).unwrap();
        assert!(session.ingest(&out[out.len() - 1]).is_paused);

        // A lift: 200 m further at vehicle pace, long after the pause
        let elsewhere = Fix::at(offset(ORIGIN, 260.0, 0.0), 5.0, resume_at + 60_000);
        session.ingest(&elsewhere);

        let outcome = session.resume(resume_at + 60_000).unwrap();
        assert!(matches!(outcome, ResumeOutcome::NewSegment { .. }));
        assert_eq!(session.finish().segments.len(), 2);
    }

    #[test]
    fn test_reset_clears_all_stages() {
        let mut session = TrackingSession::default();
        session.start().unwrap();
        run(&mut session, &walk(&[(0.0, 0.0), (50.0, 0.0)], 3.0, 0));

        session.reset();

        assert!(session.gate().last_valid().is_none());
        assert!(session.conditioner().last_output().is_none());
        assert_eq!(session.tracker().total_distance_m(), 0.0);
        assert!(!session.tracker().is_tracking());
        assert_eq!(session.stats(), SessionStats::default());
        assert_eq!(session.finish().started_at_ms, None);
    }

    #[test]
    fn test_summary_into_record() {
        let mut session = TrackingSession::default();
        session.start().unwrap();
        let square = [(0.0, 0.0), (0.0, 80.0), (80.0, 80.0), (80.0, 0.0), (0.0, 0.0)];
        run(&mut session, &walk(&square, 3.0, 5_000));

        let summary = session.finish();
        let finished = summary.finished_at_ms;
        let record = summary.into_record(RunId::from_seed(1), OwnerId::from_seed(2));

        assert_eq!(record.started_at_ms, 5_000);
        assert_eq!(Some(record.finished_at_ms), finished);
        assert!(record.territory.is_some());
        assert!(record.captured_area_m2.unwrap() > 5_000.0);
    }
}
