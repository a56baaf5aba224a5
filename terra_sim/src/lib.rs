//! Terra Deterministic Simulation Harness
//!
//! Seeded synthetic runs driven through the real engine, so conditioning and
//! territory behavior can be checked without a phone in a pocket.
//!
//! # Core Principle: One Seed, One Run
//!
//! Every source of non-determinism is scripted:
//! - **Time**: fix timestamps come from the Oracle's sampling clock
//! - **Receiver**: correlated noise and glitches drawn from a seeded ChaCha RNG
//! - **Collaborators**: fixes replayed from memory, runs saved to an in-memory store
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ Oracle (ground truth legs + receiver model)          │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │ observe()                                           │
//! │  ┌────▼─────────┐   next_fix()   ┌──────────────────┐       │
//! │  │ ReplaySource ├───────────────►│  SessionRunner   │       │
//! │  └──────────────┘                │  (terra_core)    │       │
//! │                                  └────────┬─────────┘       │
//! │                      save_run()           │ frames          │
//! │  ┌────────────────┐◄──────────────────────┤                 │
//! │  │ MemoryRunStore │                  ┌────▼──────┐          │
//! │  └────────────────┘                  │ SimExport │          │
//! │                                      └───────────┘          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use terra_sim::{ScenarioRunner, ScenarioId};
//!
//! let runner = ScenarioRunner::new(42);
//! let result = runner.run(ScenarioId::GlitchStorm).await;
//! assert!(result.passed);
//! ```

mod error;
mod exporter;
mod oracle;
mod runner;
mod source;
pub mod scenarios;

pub use error::SimError;
pub use exporter::{SimExport, SimFrame};
pub use oracle::{square_route, Glitch, GlitchProfile, NoiseModel, ObservedFix, Oracle, TruthSample};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, START_MS};
pub use scenarios::ScenarioId;
pub use source::ReplaySource;
