//! The path tracker.
//!
//! Consumes conditioned fixes and maintains the run's path as a list of
//! segments. A segment is broken only by a pause whose gap is too large to
//! splice; broken segments are never treated as connected.

use serde::{Deserialize, Serialize};
use terra_env::{Fix, GeoPoint};
use tracing::{debug, info};

use crate::geodesy;
use crate::signal_conditioner::ConditionedFix;

/// A contiguous run of path points with no pause-induced break.
pub type PathSegment = Vec<GeoPoint>;

/// Configuration for [`PathTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum spacing between appended points (default: 8 m)
    pub min_point_spacing_m: f64,

    /// Largest pause gap that is spliced instead of breaking the path (default: 50 m)
    pub max_splice_gap_m: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_point_spacing_m: 8.0,
            max_splice_gap_m: 50.0,
        }
    }
}

/// Lifecycle misuse of the tracker.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    #[error("Tracking already started")]
    AlreadyTracking,

    #[error("Not tracking")]
    NotTracking,

    #[error("Tracking already paused")]
    AlreadyPaused,

    #[error("Tracking is not paused")]
    NotPaused,
}

/// Where and when tracking was paused.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PauseAnchor {
    /// Last path point (or live position if the path was still empty)
    pub point: Option<GeoPoint>,
    pub paused_at_ms: i64,
}

/// Which branch [`PathTracker::resume`] took.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResumeOutcome {
    /// Gap was small enough; it counts toward distance
    Spliced { gap_m: f64 },

    /// Gap was too large; a new segment was started and the gap not counted
    NewSegment { gap_m: f64 },

    /// No live position to measure the gap against; path left untouched
    NoLivePosition,
}

/// The run's path state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Never empty; the last one is the active segment
    pub segments: Vec<PathSegment>,
    pub total_distance_m: f64,
    pub is_tracking: bool,
    pub is_paused: bool,
    pub pause_anchor: Option<PauseAnchor>,

    /// Accumulated time spent paused
    pub paused_ms: i64,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            segments: vec![Vec::new()],
            total_distance_m: 0.0,
            is_tracking: false,
            is_paused: false,
            pause_anchor: None,
            paused_ms: 0,
        }
    }
}

impl Track {
    /// Points across all segments.
    pub fn point_count(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    pub fn active_segment(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Last point of the path, if any.
    pub fn last_point(&self) -> Option<GeoPoint> {
        self.segments.iter().rev().find_map(|s| s.last().copied())
    }

    fn active_segment_mut(&mut self) -> &mut PathSegment {
        if self.segments.is_empty() {
            self.segments.push(Vec::new());
        }
        let last = self.segments.len() - 1;
        &mut self.segments[last]
    }
}

/// Builds the [`Track`] from conditioned fixes.
#[derive(Debug, Clone, Default)]
pub struct PathTracker {
    config: TrackerConfig,
    track: Track,

    /// Latest conditioned fix, appended or not ("you are here")
    live: Option<Fix>,
}

impl PathTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            track: Track::default(),
            live: None,
        }
    }

    /// Starts tracking with one empty segment.
    pub fn start(&mut self) -> Result<(), TrackerError> {
        if self.track.is_tracking {
            return Err(TrackerError::AlreadyTracking);
        }
        self.track = Track {
            is_tracking: true,
            ..Track::default()
        };
        info!("tracking started");
        Ok(())
    }

    /// Feeds one conditioned fix. Returns whether it extended the path.
    pub fn on_conditioned_fix(&mut self, fix: &ConditionedFix) -> bool {
        self.live = Some(fix.fix);

        if !self.track.is_tracking || self.track.is_paused || !fix.is_accepted() {
            return false;
        }

        let point = fix.point();
        let min_spacing = self.config.min_point_spacing_m;
        let segment = self.track.active_segment_mut();

        // An empty segment takes its first point even inside the deadband
        if fix.within_deadband && !segment.is_empty() {
            return false;
        }

        let added_m = match segment.last() {
            None => 0.0,
            Some(&last) => {
                let step = geodesy::distance(last, point);
                if step < min_spacing {
                    return false;
                }
                step
            }
        };

        segment.push(point);
        self.track.total_distance_m += added_m;
        true
    }

    /// Pauses tracking, anchoring at the last path point.
    pub fn pause(&mut self, now_ms: i64) -> Result<(), TrackerError> {
        if !self.track.is_tracking {
            return Err(TrackerError::NotTracking);
        }
        if self.track.is_paused {
            return Err(TrackerError::AlreadyPaused);
        }

        let point = self.track.last_point().or_else(|| self.live.map(|f| f.point()));
        self.track.pause_anchor = Some(PauseAnchor {
            point,
            paused_at_ms: now_ms,
        });
        self.track.is_paused = true;
        info!(now_ms, "tracking paused");
        Ok(())
    }

    /// Resumes tracking, splicing or breaking the path depending on how far
    /// the live position drifted from the pause anchor.
    pub fn resume(&mut self, now_ms: i64) -> Result<ResumeOutcome, TrackerError> {
        if !self.track.is_tracking {
            return Err(TrackerError::NotTracking);
        }
        if !self.track.is_paused {
            return Err(TrackerError::NotPaused);
        }

        let anchor = self.track.pause_anchor.take();
        self.track.is_paused = false;
        if let Some(anchor) = &anchor {
            self.track.paused_ms += (now_ms - anchor.paused_at_ms).max(0);
        }

        let Some(live) = self.live.map(|f| f.point()) else {
            return Ok(ResumeOutcome::NoLivePosition);
        };

        let gap_m = anchor
            .and_then(|a| a.point)
            .map(|from| geodesy::distance(from, live))
            .unwrap_or(0.0);

        let outcome = if gap_m > self.config.max_splice_gap_m {
            self.track.segments.push(Vec::new());
            ResumeOutcome::NewSegment { gap_m }
        } else {
            self.track.total_distance_m += gap_m;
            self.track.active_segment_mut().push(live);
            ResumeOutcome::Spliced { gap_m }
        };

        debug!(?outcome, "tracking resumed");
        Ok(outcome)
    }

    /// Stops tracking; the path stays readable for finalization.
    pub fn stop(&mut self) {
        self.track.is_tracking = false;
        self.track.is_paused = false;
        self.track.pause_anchor = None;
        info!(
            distance_m = self.track.total_distance_m,
            segments = self.track.segments.len(),
            "tracking stopped"
        );
    }

    /// One empty segment, zero distance, not tracking.
    pub fn reset(&mut self) {
        self.track = Track::default();
        self.live = None;
    }

    /// Seeds the path from a previously saved in-progress run and keeps
    /// tracking from there.
    pub fn continue_from(&mut self, points: Vec<GeoPoint>, distance_m: f64) {
        self.track = Track {
            segments: vec![points],
            total_distance_m: distance_m,
            is_tracking: true,
            ..Track::default()
        };
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.track.segments
    }

    pub fn total_distance_m(&self) -> f64 {
        self.track.total_distance_m
    }

    pub fn is_tracking(&self) -> bool {
        self.track.is_tracking
    }

    pub fn is_paused(&self) -> bool {
        self.track.is_paused
    }

    pub fn live_position(&self) -> Option<&Fix> {
        self.live.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::offset;
    use crate::signal_conditioner::{Rejection, Verdict};
    use approx::assert_relative_eq;

    const ORIGIN: GeoPoint = GeoPoint { lat: 48.8566, lng: 2.3522 };

    fn at(north_m: f64, east_m: f64) -> ConditionedFix {
        ConditionedFix::new(Fix::at(offset(ORIGIN, north_m, east_m), 5.0, 0))
    }

    /// Five points 10 m apart heading north, 40 m of path.
    fn walked_five() -> PathTracker {
        let mut tracker = PathTracker::default();
        tracker.start().unwrap();
        for k in 0..5 {
            assert!(tracker.on_conditioned_fix(&at(k as f64 * 10.0, 0.0)));
        }
        tracker
    }

    #[test]
    fn test_start_twice_fails() {
        let mut tracker = PathTracker::default();
        tracker.start().unwrap();
        assert_eq!(tracker.start(), Err(TrackerError::AlreadyTracking));
        assert_eq!(tracker.segments().len(), 1);
    }

    #[test]
    fn test_min_spacing() {
        let mut tracker = PathTracker::default();
        tracker.start().unwrap();

        assert!(tracker.on_conditioned_fix(&at(0.0, 0.0)));
        assert!(!tracker.on_conditioned_fix(&at(5.0, 0.0)));
        assert!(tracker.on_conditioned_fix(&at(9.0, 0.0)));

        assert_eq!(tracker.segments()[0].len(), 2);
        assert_relative_eq!(tracker.total_distance_m(), 9.0, epsilon = 1e-3);
    }

    #[test]
    fn test_ignored_when_not_tracking_but_live_updates() {
        let mut tracker = PathTracker::default();
        assert!(!tracker.on_conditioned_fix(&at(0.0, 0.0)));

        assert_eq!(tracker.track().point_count(), 0);
        assert!(tracker.live_position().is_some());
    }

    #[test]
    fn test_deadband_fixes_not_appended() {
        let mut tracker = PathTracker::default();
        tracker.start().unwrap();
        assert!(tracker.on_conditioned_fix(&at(0.0, 0.0)));

        let mut fix = at(9.0, 0.0);
        fix.within_deadband = true;
        assert!(!tracker.on_conditioned_fix(&fix));
        assert_eq!(tracker.track().point_count(), 1);
    }

    #[test]
    fn test_empty_segment_takes_point_inside_deadband() {
        let mut tracker = PathTracker::default();
        tracker.start().unwrap();

        // Anchor already set by fixes conditioned before start()
        let mut fix = at(0.0, 0.0);
        fix.within_deadband = true;
        assert!(tracker.on_conditioned_fix(&fix));
        assert_eq!(tracker.track().point_count(), 1);
        assert_eq!(tracker.total_distance_m(), 0.0);

        // Rejected repeats never start a path
        tracker.reset();
        tracker.start().unwrap();
        let mut repeat = at(0.0, 0.0);
        repeat.within_deadband = true;
        repeat.verdict = Verdict::Rejected(Rejection::MissingAccuracy);
        assert!(!tracker.on_conditioned_fix(&repeat));
        assert_eq!(tracker.track().point_count(), 0);
    }

    #[test]
    fn test_resume_far_breaks_path() {
        let mut tracker = walked_five();
        assert_relative_eq!(tracker.total_distance_m(), 40.0, epsilon = 1e-3);

        tracker.pause(10_000).unwrap();
        // Drifted 60 m while paused
        assert!(!tracker.on_conditioned_fix(&at(100.0, 0.0)));

        let outcome = tracker.resume(70_000).unwrap();
        assert!(matches!(outcome, ResumeOutcome::NewSegment { .. }));
        assert_eq!(tracker.segments().len(), 2);
        assert!(tracker.segments()[1].is_empty());
        assert_relative_eq!(tracker.total_distance_m(), 40.0, epsilon = 1e-3);
        assert_eq!(tracker.track().paused_ms, 60_000);
    }

    #[test]
    fn test_resume_near_splices() {
        let mut tracker = walked_five();

        tracker.pause(10_000).unwrap();
        tracker.on_conditioned_fix(&at(60.0, 0.0));

        match tracker.resume(20_000).unwrap() {
            ResumeOutcome::Spliced { gap_m } => assert_relative_eq!(gap_m, 20.0, epsilon = 1e-3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(tracker.segments().len(), 1);
        assert_eq!(tracker.segments()[0].len(), 6);
        assert_relative_eq!(tracker.total_distance_m(), 60.0, epsilon = 1e-3);
    }

    #[test]
    fn test_pause_resume_lifecycle_errors() {
        let mut tracker = PathTracker::default();
        assert_eq!(tracker.pause(0), Err(TrackerError::NotTracking));
        assert_eq!(tracker.resume(0), Err(TrackerError::NotTracking));

        tracker.start().unwrap();
        assert_eq!(tracker.resume(0), Err(TrackerError::NotPaused));

        tracker.pause(0).unwrap();
        assert_eq!(tracker.pause(0), Err(TrackerError::AlreadyPaused));
    }

    #[test]
    fn test_resume_without_live_position() {
        let mut tracker = PathTracker::default();
        tracker.start().unwrap();
        tracker.pause(0).unwrap();

        assert_eq!(tracker.resume(1_000), Ok(ResumeOutcome::NoLivePosition));
        assert!(!tracker.is_paused());
    }

    #[test]
    fn test_stop_keeps_path() {
        let mut tracker = walked_five();
        tracker.pause(0).unwrap();
        tracker.stop();

        assert!(!tracker.is_tracking());
        assert!(!tracker.is_paused());
        assert_eq!(tracker.segments()[0].len(), 5);
        assert!(!tracker.on_conditioned_fix(&at(100.0, 0.0)));
    }

    #[test]
    fn test_reset_clears_path() {
        let mut tracker = walked_five();
        tracker.reset();

        assert_eq!(tracker.segments().len(), 1);
        assert!(tracker.segments()[0].is_empty());
        assert_eq!(tracker.total_distance_m(), 0.0);
        assert!(!tracker.is_paused());
        assert!(tracker.live_position().is_none());
    }

    #[test]
    fn test_continue_from_seeds_prior_run() {
        let mut tracker = PathTracker::default();
        let prior = vec![offset(ORIGIN, 0.0, 0.0), offset(ORIGIN, 50.0, 0.0)];
        tracker.continue_from(prior, 1_234.0);

        assert!(tracker.is_tracking());
        assert!(tracker.on_conditioned_fix(&at(60.0, 0.0)));
        assert_relative_eq!(tracker.total_distance_m(), 1_244.0, epsilon = 1e-3);
        assert_eq!(tracker.segments()[0].len(), 3);
    }
}
