//! Session runtime: drives a [`TrackingSession`] from injected collaborators.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     SessionRunner                        │
//! │                                                          │
//! │  LocationSource ──next_fix()──► TrackingSession          │
//! │                                   │ gate → conditioner   │
//! │        scheduled pause/resume ───►│ → tracker            │
//! │                                   ▼                      │
//! │                               finish()                   │
//! │                                   │                      │
//! │  RunStore ◄──save_run(RunRecord)──┘                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The runner only awaits its collaborators; the session itself never
//! blocks and never reads a clock. Pause and resume are scheduled against
//! fix timestamps so replays stay deterministic.
//!
//! # Usage
//!
//! ```ignore
//! use terra_env::{channel_source, MemoryRunStore, OwnerId};
//! use terra_core::{EngineConfig, SessionRunner};
//!
//! let (feed, source) = channel_source(64);
//! let store = Arc::new(MemoryRunStore::new());
//! let mut runner = SessionRunner::new(Arc::new(source), store, OwnerId::new(), &EngineConfig::default());
//! let outcome = runner.run().await?;
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use terra_env::{EnvError, Fix, LocationSource, OwnerId, RunId, RunRecord, RunStore};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::session::{RunSummary, SessionSnapshot, TrackingSession};
use crate::territory::{TerritoryEngine, TerritorySet};

/// A lifecycle command applied between fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Pause,
    Resume,
}

/// A command applied before the first fix whose timestamp reaches `at_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledCommand {
    pub at_ms: i64,
    pub command: SessionCommand,
}

impl ScheduledCommand {
    pub fn pause(at_ms: i64) -> Self {
        Self { at_ms, command: SessionCommand::Pause }
    }

    pub fn resume(at_ms: i64) -> Self {
        Self { at_ms, command: SessionCommand::Resume }
    }
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,

    /// The record that was saved to the store
    pub record: RunRecord,
}

/// Async driver for one tracking session.
///
/// Generic over the collaborators so the same code runs against a platform
/// provider or a simulated replay.
pub struct SessionRunner<Src, St>
where
    Src: LocationSource,
    St: RunStore,
{
    source: Arc<Src>,
    store: Arc<St>,
    owner: OwnerId,
    run_id: RunId,
    session: TrackingSession,
    schedule: VecDeque<ScheduledCommand>,
}

impl<Src, St> SessionRunner<Src, St>
where
    Src: LocationSource,
    St: RunStore,
{
    pub fn new(source: Arc<Src>, store: Arc<St>, owner: OwnerId, config: &EngineConfig) -> Self {
        Self {
            source,
            store,
            owner,
            run_id: RunId::new(),
            session: TrackingSession::new(config),
            schedule: VecDeque::new(),
        }
    }

    /// Uses a fixed run id (deterministic replays).
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Applies pause/resume commands as fix timestamps pass them.
    pub fn with_schedule(mut self, mut schedule: Vec<ScheduledCommand>) -> Self {
        schedule.sort_by_key(|c| c.at_ms);
        self.schedule = schedule.into();
        self
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    /// Mutable access, e.g. to [`continue_from`](TrackingSession::continue_from)
    /// before running.
    pub fn session_mut(&mut self) -> &mut TrackingSession {
        &mut self.session
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Runs until the source closes, then saves the run.
    pub async fn run(&mut self) -> Result<RunOutcome, EnvError> {
        self.run_with(|_, _| {}).await
    }

    /// Like [`run`](Self::run), reporting every raw fix with its snapshot.
    pub async fn run_with<F>(&mut self, mut on_frame: F) -> Result<RunOutcome, EnvError>
    where
        F: FnMut(&Fix, &SessionSnapshot),
    {
        if let Err(e) = self.session.start() {
            debug!(error = %e, "continuing seeded track");
        }
        info!(owner = %self.owner, run = %self.run_id, "session started");

        while let Some(fix) = self.source.next_fix().await {
            self.apply_due_commands(fix.timestamp_ms);
            let snapshot = self.session.ingest(&fix);
            on_frame(&fix, &snapshot);
        }

        let summary = self.session.finish();
        let record = summary.clone().into_record(self.run_id, self.owner);
        self.store.save_run(record.clone()).await?;
        info!(run = %self.run_id, distance_m = record.distance_m, "run saved");

        Ok(RunOutcome { summary, record })
    }

    fn apply_due_commands(&mut self, timestamp_ms: i64) {
        while let Some(next) = self.schedule.front().copied() {
            if next.at_ms > timestamp_ms {
                break;
            }
            self.schedule.pop_front();

            let result = match next.command {
                SessionCommand::Pause => self.session.pause(next.at_ms),
                SessionCommand::Resume => self.session.resume(next.at_ms).map(|outcome| {
                    debug!(?outcome, "scheduled resume");
                }),
            };
            if let Err(e) = result {
                warn!(command = ?next.command, error = %e, "scheduled command ignored");
            }
        }
    }
}

/// Loads stored territory rings and unions them per owner.
///
/// `owner = None` loads every owner's territories.
pub async fn territory_view<St: RunStore + ?Sized>(
    store: &St,
    owner: Option<OwnerId>,
    engine: &TerritoryEngine,
) -> Result<TerritorySet, EnvError> {
    let rings = store.territories(owner).await?;
    debug!(rings = rings.len(), "building territory view");
    Ok(engine.territory_set(&rings))
}
