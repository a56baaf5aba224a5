//! Run-history store abstraction.

use async_trait::async_trait;

use crate::error::EnvError;
use crate::types::{GeoPoint, OwnerId, RunRecord};

/// Persistence for finished runs and the territories they captured.
///
/// The engine only produces [`RunRecord`]s and consumes territory rings;
/// how they are stored (and synced) belongs to the implementation.
#[async_trait]
pub trait RunStore: Send + Sync + 'static {
    /// Persists a finished run.
    ///
    /// # Returns
    /// * `Ok(())` - Stored
    /// * `Err(EnvError::DuplicateRun)` - A run with the same id exists
    async fn save_run(&self, record: RunRecord) -> Result<(), EnvError>;

    /// All runs of one owner, oldest first.
    async fn runs_for(&self, owner: OwnerId) -> Result<Vec<RunRecord>, EnvError>;

    /// Stored territory rings, optionally restricted to one owner.
    ///
    /// Runs without a captured territory are skipped.
    async fn territories(
        &self,
        owner: Option<OwnerId>,
    ) -> Result<Vec<(OwnerId, Vec<GeoPoint>)>, EnvError>;
}
