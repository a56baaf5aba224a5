//! Terra Core - Location Conditioning and Territory Geometry Engine
//!
//! This library turns a noisy GPS fix stream into territory claims:
//! 1. **Signal conditioning**: gate, per-axis scalar filter, deadband and
//!    stationary lock turn raw fixes into one trustworthy estimate each
//! 2. **Path tracking**: conditioned fixes become segments with pause/resume
//!    splicing and a running distance
//! 3. **Territory geometry**: closed-loop detection, spherical area, best-loop
//!    search and planar union of overlapping claims
//!
//! The engine is synchronous and clock-free; [`SessionRunner`] drives it from
//! the collaborators declared in `terra_env`.

pub mod config;
pub mod fix_gate;
pub mod geodesy;
pub mod path_tracker;
pub mod position_filter;
pub mod session;
pub mod session_runtime;
pub mod signal_conditioner;
pub mod territory;

// Re-export key types for convenience
pub use config::{ConfigError, EngineConfig};
pub use fix_gate::{FixGate, GateConfig, GateRejection};
pub use path_tracker::{PathSegment, PathTracker, ResumeOutcome, Track, TrackerConfig, TrackerError};
pub use position_filter::{FilterConfig, ScalarPositionFilter};
pub use session::{LoopSource, RunSummary, SessionSnapshot, SessionStats, TrackingSession};
pub use session_runtime::{territory_view, RunOutcome, ScheduledCommand, SessionCommand, SessionRunner};
pub use signal_conditioner::{ConditionedFix, ConditionerConfig, Rejection, SignalConditioner, Verdict};
pub use territory::{LoopCapture, TerritoryConfig, TerritoryEngine, TerritoryError, TerritoryPolygon, TerritorySet};
