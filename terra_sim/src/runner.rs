//! Scenario runner - drives seeded synthetic runs through the engine.

use crate::exporter::{SimExport, SimFrame};
use crate::oracle::{square_route, GlitchProfile, NoiseModel, ObservedFix, Oracle};
use crate::scenarios::ScenarioId;
use crate::source::ReplaySource;

use nalgebra::Vector2;
use std::sync::Arc;
use terra_core::{
    geodesy, territory_view, EngineConfig, LoopSource, RunOutcome, RunSummary, ScheduledCommand, SessionRunner,
    TerritoryEngine,
};
use terra_env::{EnvError, GeoPoint, MemoryRunStore, OwnerId, RunId};
use tracing::{debug, info, warn};

/// Simulated wall clock at the first fix of every scenario (Unix ms).
pub const START_MS: i64 = 1_700_000_000_000;

/// Walking pace used by every scripted leg (m/s).
const WALK_MPS: f64 = 3.0;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Raw fixes replayed, across all runs
    pub total_fixes: u64,

    /// Simulated time of the last fix, seconds since the scenario start
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioMetrics {
    /// Fixes discarded by the gate
    pub gated: u64,

    /// Fixes rejected by the conditioner
    pub rejected: u64,

    /// Points appended to the path
    pub appended: u64,

    /// Segments in the last run's path
    pub segments: usize,

    /// Distance summed over all runs (m)
    pub distance_m: f64,

    /// Captured area summed over all runs (m²)
    pub captured_area_m2: f64,

    /// Worst conditioned-vs-truth error over all frames (m)
    pub max_error_m: f64,
}

/// One session replay and its frames.
struct Replay {
    outcome: RunOutcome,
    frames: Vec<SimFrame>,
}

/// Everything a scenario produced, plus its pass/fail check.
struct ScenarioTrace {
    replays: Vec<Replay>,
    check: Result<(), String>,
}

impl ScenarioTrace {
    fn single(replay: Replay, check: Result<(), String>) -> Self {
        Self {
            replays: vec![replay],
            check,
        }
    }
}

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Engine configuration handed to every session
    config: EngineConfig,

    /// Where every scenario is staged
    origin: GeoPoint,

    /// Overrides each scenario's own receiver noise
    noise: Option<NoiseModel>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: EngineConfig::default(),
            origin: GeoPoint::new(38.7223, -9.1393),
            noise: None,
        }
    }

    /// Sets the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets where scenarios are staged.
    pub fn with_origin(mut self, origin: GeoPoint) -> Self {
        self.origin = origin;
        self
    }

    /// Forces one receiver noise model on every scenario.
    pub fn with_noise(mut self, noise: NoiseModel) -> Self {
        self.noise = Some(noise);
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_recorded(scenario).await.0
    }

    /// Runs a scenario, also returning every frame for export.
    pub async fn run_recorded(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let trace = match scenario {
            ScenarioId::SquareLoop => self.run_square_loop().await,
            ScenarioId::DoubleLap => self.run_double_lap().await,
            ScenarioId::StationaryDrift => self.run_stationary_drift().await,
            ScenarioId::GlitchStorm => self.run_glitch_storm().await,
            ScenarioId::PauseGap => self.run_pause_gap().await,
            ScenarioId::TerritoryMerge => self.run_territory_merge().await,
            ScenarioId::VehicleHandoff => self.run_vehicle_handoff().await,
        };

        let export = SimExport::new(scenario.name(), self.seed);
        match trace {
            Ok(trace) => self.conclude(scenario, trace, export),
            Err(e) => {
                warn!("Scenario {} aborted: {}", scenario.name(), e);
                self.aborted(scenario, e, export)
            }
        }
    }

    /// SIM-001: SquareLoop - one lap around a 200 m block.
    ///
    /// **Assertion**: The path closes and captures 40 000 m² ± 15%.
    async fn run_square_loop(&self) -> Result<ScenarioTrace, EnvError> {
        info!("SIM-001: SquareLoop - one lap around a 200 m block");

        let mut oracle = self.oracle(1, self.origin, START_MS, NoiseModel::default());
        oracle.walk_route(&square_route(200.0, Vector2::zeros()), WALK_MPS);
        oracle.hold(10_000);

        let replay = self.replay_single(&oracle.observe(), Vec::new()).await?;
        let summary = &replay.outcome.summary;

        let check = if !summary.closed_loop {
            Err(format!("Path did not close ({} segments)", summary.segments.len()))
        } else {
            check_area(summary, 40_000.0, 0.15)
        };

        Ok(ScenarioTrace::single(replay, check))
    }

    /// SIM-002: DoubleLap - the same block walked twice, then a walk away.
    ///
    /// **Assertion**: The best-loop search counts the block once
    /// (10 000 m² ± 25%).
    async fn run_double_lap(&self) -> Result<ScenarioTrace, EnvError> {
        info!("SIM-002: DoubleLap - two laps and a 150 m tail");

        let mut route = square_route(100.0, Vector2::zeros());
        route.extend(square_route(100.0, Vector2::zeros()));
        route.push(Vector2::new(-150.0, 0.0));

        let mut oracle = self.oracle(2, self.origin, START_MS, NoiseModel::default());
        oracle.walk_route(&route, WALK_MPS);

        let replay = self.replay_single(&oracle.observe(), Vec::new()).await?;
        let summary = &replay.outcome.summary;

        let check = match summary.loop_source {
            Some(LoopSource::BestLoop { .. }) => check_area(summary, 10_000.0, 0.25),
            other => Err(format!("Expected a best-loop capture, got {:?}", other)),
        };

        Ok(ScenarioTrace::single(replay, check))
    }

    /// SIM-003: StationaryDrift - two minutes standing still.
    ///
    /// **Assertion**: Path distance stays under 30% of the raw jitter length.
    async fn run_stationary_drift(&self) -> Result<ScenarioTrace, EnvError> {
        info!("SIM-003: StationaryDrift - 120 s of drifting fixes");

        let drift = NoiseModel {
            position_std_m: 3.0,
            ..NoiseModel::default()
        };
        let mut oracle = self.oracle(3, self.origin, START_MS, drift);
        oracle.hold(120_000);
        let observed = oracle.observe();

        let raw_jitter_m: f64 = observed
            .windows(2)
            .map(|w| geodesy::distance(w[0].raw.point(), w[1].raw.point()))
            .sum();

        let replay = self.replay_single(&observed, Vec::new()).await?;
        let distance_m = replay.outcome.summary.distance_m;
        debug!("  raw jitter={:.1}m | path distance={:.1}m", raw_jitter_m, distance_m);

        let check = if distance_m > raw_jitter_m * 0.3 {
            Err(format!(
                "Path grew {:.1}m from {:.1}m of raw jitter",
                distance_m, raw_jitter_m
            ))
        } else {
            Ok(())
        };

        Ok(ScenarioTrace::single(replay, check))
    }

    /// SIM-004: GlitchStorm - a lap under every receiver glitch at once.
    ///
    /// **Assertion**: Glitches are gated, no path point strays more than
    /// 30 m from the truth and the loop still closes.
    async fn run_glitch_storm(&self) -> Result<ScenarioTrace, EnvError> {
        info!("SIM-004: GlitchStorm - 150 m lap with a hostile receiver");

        let mut oracle = self
            .oracle(4, self.origin, START_MS, NoiseModel::default())
            .with_glitches(GlitchProfile::storm());
        oracle.walk_route(&square_route(150.0, Vector2::zeros()), WALK_MPS);
        oracle.hold(10_000);
        let observed = oracle.observe();
        let injected = observed.iter().filter(|o| o.glitch.is_some()).count();

        let replay = self.replay_single(&observed, Vec::new()).await?;
        let summary = &replay.outcome.summary;

        let max_deviation_m = replay
            .frames
            .iter()
            .filter(|f| f.appended)
            .filter_map(SimFrame::error_m)
            .fold(0.0, f64::max);
        debug!(
            "  injected={} | gated={} | rejected={} | max deviation={:.1}m",
            injected, summary.stats.gated, summary.stats.rejected, max_deviation_m
        );

        let check = if summary.stats.gated == 0 {
            Err("No fix was gated".to_string())
        } else if max_deviation_m > 30.0 {
            Err(format!("Path strayed {:.1}m from the truth", max_deviation_m))
        } else if !summary.closed_loop {
            Err("Path did not close".to_string())
        } else {
            Ok(())
        };

        Ok(ScenarioTrace::single(replay, check))
    }

    /// SIM-005: PauseGap - one pause spliced, one pause breaking the path.
    ///
    /// **Assertion**: Exactly two segments; the 150 m paused leg is not
    /// counted as distance.
    async fn run_pause_gap(&self) -> Result<ScenarioTrace, EnvError> {
        info!("SIM-005: PauseGap - 20 m and 150 m pause gaps");

        let mut oracle = self.oracle(5, self.origin, START_MS, NoiseModel::default());
        let mut schedule = Vec::new();

        oracle.walk_to(Vector2::new(100.0, 0.0), WALK_MPS);
        schedule.push(ScheduledCommand::pause(oracle.time_ms() + 1));
        oracle.walk_to(Vector2::new(100.0, 20.0), WALK_MPS);
        schedule.push(ScheduledCommand::resume(oracle.time_ms() + 1));
        oracle.walk_to(Vector2::new(200.0, 20.0), WALK_MPS);
        schedule.push(ScheduledCommand::pause(oracle.time_ms() + 1));
        oracle.walk_to(Vector2::new(200.0, 170.0), WALK_MPS);
        schedule.push(ScheduledCommand::resume(oracle.time_ms() + 1));
        oracle.walk_to(Vector2::new(250.0, 170.0), WALK_MPS);

        let replay = self.replay_single(&oracle.observe(), schedule).await?;
        let summary = &replay.outcome.summary;

        let check = if summary.segments.len() != 2 {
            Err(format!("Expected 2 segments, got {}", summary.segments.len()))
        } else if summary.distance_m <= 180.0 || summary.distance_m >= 300.0 {
            Err(format!("Distance {:.1}m outside (180, 300)", summary.distance_m))
        } else {
            Ok(())
        };

        Ok(ScenarioTrace::single(replay, check))
    }

    /// SIM-006: TerritoryMerge - overlapping runs for one owner.
    ///
    /// **Assertion**: The owner's view holds one polygon whose area lies
    /// between the larger run and the sum of both; the rival stays separate.
    async fn run_territory_merge(&self) -> Result<ScenarioTrace, EnvError> {
        info!("SIM-006: TerritoryMerge - two overlapping 120 m blocks");

        let store = Arc::new(MemoryRunStore::new());
        let home = OwnerId::from_seed(self.seed);
        let rival = OwnerId::from_seed(self.seed.wrapping_add(1));
        let runs = [(home, 0.0, 0.0), (home, 60.0, 60.0), (rival, 2_000.0, 2_000.0)];

        let mut replays = Vec::with_capacity(runs.len());
        for (run, (owner, north_m, east_m)) in runs.into_iter().enumerate() {
            let start = geodesy::offset(self.origin, north_m, east_m);
            let start_ms = START_MS + run as i64 * 1_000_000;
            let mut oracle = self.oracle(60 + run as u64, start, start_ms, NoiseModel::default());
            oracle.walk_route(&square_route(120.0, Vector2::zeros()), WALK_MPS);
            oracle.hold(5_000);

            replays.push(self.replay(&oracle.observe(), &store, owner, run as u64, Vec::new()).await?);
        }

        let engine = TerritoryEngine::new(self.config.territory.clone());
        let home_view = territory_view(store.as_ref(), Some(home), &engine).await?;
        let full_view = territory_view(store.as_ref(), None, &engine).await?;

        let areas: Vec<f64> = replays[..2]
            .iter()
            .filter_map(|r| r.outcome.summary.captured_area_m2)
            .collect();
        let merged = home_view.get(&home).unwrap_or_default();

        let check = if areas.len() != 2 {
            Err("A home run captured no territory".to_string())
        } else if merged.len() != 1 {
            Err(format!("Expected 1 merged territory, got {}", merged.len()))
        } else if full_view.len() != 2 {
            Err(format!("Expected 2 owners in the full view, got {}", full_view.len()))
        } else {
            let merged_m2 = merged[0].area_m2();
            let largest = areas[0].max(areas[1]);
            let sum = areas[0] + areas[1];
            debug!("  runs={:.0}/{:.0} m² | merged={:.0} m²", areas[0], areas[1], merged_m2);

            // Planar union against spherical run areas
            if merged_m2 < largest * 0.99 || merged_m2 > sum * 1.01 {
                Err(format!(
                    "Merged area {:.0} m² outside [{:.0}, {:.0}]",
                    merged_m2, largest, sum
                ))
            } else {
                Ok(())
            }
        };

        Ok(ScenarioTrace { replays, check })
    }

    /// SIM-007: VehicleHandoff - walk, ride, walk.
    ///
    /// **Assertion**: The ride trips the speed check, and the conditioned
    /// position still ends within 40 m of the truth.
    async fn run_vehicle_handoff(&self) -> Result<ScenarioTrace, EnvError> {
        info!("SIM-007: VehicleHandoff - 900 m ride at 28 m/s");

        let mut oracle = self.oracle(7, self.origin, START_MS, NoiseModel::default());
        oracle.walk_to(Vector2::new(60.0, 0.0), WALK_MPS);
        oracle.walk_to(Vector2::new(960.0, 0.0), 28.0);
        oracle.walk_to(Vector2::new(1_110.0, 0.0), WALK_MPS);

        let replay = self.replay_single(&oracle.observe(), Vec::new()).await?;
        let summary = &replay.outcome.summary;
        let final_error_m = replay.frames.last().and_then(SimFrame::error_m);

        let check = match final_error_m {
            _ if summary.stats.rejected == 0 => Err("Ride never tripped the speed check".to_string()),
            None => Err("No conditioned position at the end".to_string()),
            Some(e) if e >= 40.0 => Err(format!("Final error {:.1}m after the ride", e)),
            Some(_) => Ok(()),
        };

        Ok(ScenarioTrace::single(replay, check))
    }

    // ========== Private Helper Methods ==========

    fn oracle(&self, salt: u64, origin: GeoPoint, start_ms: i64, noise: NoiseModel) -> Oracle {
        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15) ^ salt;
        Oracle::new(physics_seed, origin, start_ms).with_noise(self.noise.clone().unwrap_or(noise))
    }

    async fn replay_single(
        &self,
        observed: &[ObservedFix],
        schedule: Vec<ScheduledCommand>,
    ) -> Result<Replay, EnvError> {
        let store = Arc::new(MemoryRunStore::new());
        self.replay(observed, &store, OwnerId::from_seed(self.seed), 0, schedule)
            .await
    }

    /// Replays observed fixes through a full [`SessionRunner`], recording a
    /// frame per fix.
    async fn replay(
        &self,
        observed: &[ObservedFix],
        store: &Arc<MemoryRunStore>,
        owner: OwnerId,
        run: u64,
        schedule: Vec<ScheduledCommand>,
    ) -> Result<Replay, EnvError> {
        let source = Arc::new(ReplaySource::new(observed.iter().map(|o| o.raw)));
        let mut runner = SessionRunner::new(source, Arc::clone(store), owner, &self.config)
            .with_run_id(RunId::from_seed(self.seed.wrapping_add(run)))
            .with_schedule(schedule);

        let mut frames = Vec::with_capacity(observed.len());
        let mut pending = observed.iter();
        let outcome = runner
            .run_with(|_, snapshot| {
                if let Some(obs) = pending.next() {
                    frames.push(SimFrame::new(obs, snapshot));
                }
            })
            .await?;

        debug!(
            "  run {} | fixes={} | segments={} | distance={:.1}m",
            run,
            frames.len(),
            outcome.summary.segments.len(),
            outcome.summary.distance_m
        );

        Ok(Replay { outcome, frames })
    }

    fn conclude(&self, scenario: ScenarioId, trace: ScenarioTrace, mut export: SimExport) -> (ScenarioResult, SimExport) {
        let mut metrics = ScenarioMetrics::default();
        let mut total_fixes = 0;
        let mut last_time_ms = START_MS;

        for replay in &trace.replays {
            let summary = &replay.outcome.summary;
            total_fixes += summary.stats.received;
            metrics.gated += summary.stats.gated;
            metrics.rejected += summary.stats.rejected;
            metrics.appended += summary.stats.appended;
            metrics.distance_m += summary.distance_m;
            metrics.captured_area_m2 += summary.captured_area_m2.unwrap_or(0.0);
            metrics.max_error_m = replay
                .frames
                .iter()
                .filter_map(SimFrame::error_m)
                .fold(metrics.max_error_m, f64::max);
            last_time_ms = last_time_ms.max(summary.finished_at_ms.unwrap_or(START_MS));
        }

        if let Some(last) = trace.replays.last() {
            let summary = &last.outcome.summary;
            metrics.segments = summary.segments.len();
            export.set_path(
                summary.segments.clone(),
                summary.territory.as_ref().map(|t| t.exterior.clone()),
            );
        }

        for replay in trace.replays {
            for frame in replay.frames {
                export.add_frame(frame);
            }
        }

        let failure_reason = trace.check.err();
        let passed = failure_reason.is_none();
        export.finalize(passed, failure_reason.clone());

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_fixes,
            final_time_secs: (last_time_ms - START_MS) as f64 / 1000.0,
            failure_reason,
            metrics,
        };
        (result, export)
    }

    fn aborted(&self, scenario: ScenarioId, error: EnvError, mut export: SimExport) -> (ScenarioResult, SimExport) {
        let reason = format!("Environment error: {}", error);
        export.finalize(false, Some(reason.clone()));

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_fixes: 0,
            final_time_secs: 0.0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        };
        (result, export)
    }
}

/// Captured area within `tolerance` (fraction) of `expected_m2`.
fn check_area(summary: &RunSummary, expected_m2: f64, tolerance: f64) -> Result<(), String> {
    let area = summary
        .captured_area_m2
        .ok_or_else(|| "No territory captured".to_string())?;
    let error = (area - expected_m2).abs() / expected_m2;
    if error > tolerance {
        return Err(format!(
            "Captured {:.0} m², expected {:.0} m² ±{:.0}%",
            area,
            expected_m2,
            tolerance * 100.0
        ));
    }
    Ok(())
}
