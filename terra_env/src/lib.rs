//! Terra Environment Boundary
//!
//! The Terra engine never reaches out to a platform location service or a
//! persistence layer on its own. Everything that crosses that line is
//! declared here so the engine can be driven by:
//! - **Production** collaborators (a platform provider, a database-backed store)
//! - **Simulation** collaborators (`terra_sim` replaying seeded synthetic runs)
//!
//! # Boundary Types
//!
//! - [`Fix`] / [`GeoPoint`]: what the location provider hands in
//! - [`OwnerId`] / [`RunId`] / [`RunRecord`]: what the run-history store keeps
//!
//! # Example
//!
//! ```ignore
//! use terra_env::{channel_source, MemoryRunStore, LocationSource};
//!
//! let (feed, source) = channel_source(64);
//! feed.push(fix).await?;
//! drop(feed);
//!
//! while let Some(fix) = source.next_fix().await {
//!     session.ingest(&fix);
//! }
//! ```

mod error;
mod source;
mod store;
mod tokio_impl;
mod types;

pub use error::EnvError;
pub use source::LocationSource;
pub use store::RunStore;
pub use tokio_impl::{channel_source, ChannelLocationSource, LocationFeed, MemoryRunStore};
pub use types::{Fix, GeoPoint, OwnerId, RunId, RunRecord};
