//! In-process collaborators backed by Tokio primitives.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::EnvError;
use crate::source::LocationSource;
use crate::store::RunStore;
use crate::types::{Fix, GeoPoint, OwnerId, RunRecord};

/// Creates a bounded fix channel.
///
/// The [`LocationFeed`] half is given to whatever produces fixes (a platform
/// bridge, a replay), the [`ChannelLocationSource`] half to the session.
/// Dropping every feed closes the source.
pub fn channel_source(capacity: usize) -> (LocationFeed, ChannelLocationSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        LocationFeed { tx },
        ChannelLocationSource {
            rx: Mutex::new(rx),
        },
    )
}

/// Producer half of [`channel_source`].
#[derive(Debug, Clone)]
pub struct LocationFeed {
    tx: mpsc::Sender<Fix>,
}

impl LocationFeed {
    /// Delivers one fix, waiting for capacity.
    pub async fn push(&self, fix: Fix) -> Result<(), EnvError> {
        self.tx.send(fix).await.map_err(|_| EnvError::SourceClosed)
    }
}

/// Consumer half of [`channel_source`].
pub struct ChannelLocationSource {
    rx: Mutex<mpsc::Receiver<Fix>>,
}

#[async_trait]
impl LocationSource for ChannelLocationSource {
    async fn next_fix(&self) -> Option<Fix> {
        self.rx.lock().await.recv().await
    }
}

/// Run-history store that keeps everything in memory.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<Vec<RunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save_run(&self, record: RunRecord) -> Result<(), EnvError> {
        let mut runs = self.runs.write().await;
        if runs.iter().any(|r| r.id == record.id) {
            return Err(EnvError::DuplicateRun(record.id));
        }
        runs.push(record);
        Ok(())
    }

    async fn runs_for(&self, owner: OwnerId) -> Result<Vec<RunRecord>, EnvError> {
        let runs = self.runs.read().await;
        Ok(runs.iter().filter(|r| r.owner == owner).cloned().collect())
    }

    async fn territories(
        &self,
        owner: Option<OwnerId>,
    ) -> Result<Vec<(OwnerId, Vec<GeoPoint>)>, EnvError> {
        let runs = self.runs.read().await;
        Ok(runs
            .iter()
            .filter(|r| owner.map_or(true, |o| r.owner == o))
            .filter_map(|r| r.territory.clone().map(|ring| (r.owner, ring)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunId;

    fn record(seed: u64, owner: OwnerId, territory: Option<Vec<GeoPoint>>) -> RunRecord {
        RunRecord {
            id: RunId::from_seed(seed),
            owner,
            started_at_ms: 0,
            finished_at_ms: 60_000,
            distance_m: 120.0,
            segments: vec![vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.001, 0.0)]],
            captured_area_m2: None,
            territory,
        }
    }

    #[tokio::test]
    async fn test_channel_source_delivers_in_order_then_closes() {
        let (feed, source) = channel_source(4);
        feed.push(Fix::new(1.0, 1.0, 5.0, 1000)).await.unwrap();
        feed.push(Fix::new(2.0, 2.0, 5.0, 2000)).await.unwrap();
        drop(feed);

        assert_eq!(source.next_fix().await.map(|f| f.timestamp_ms), Some(1000));
        assert_eq!(source.next_fix().await.map(|f| f.timestamp_ms), Some(2000));
        assert!(source.next_fix().await.is_none());
    }

    #[tokio::test]
    async fn test_feed_errors_after_source_dropped() {
        let (feed, source) = channel_source(1);
        drop(source);
        let result = feed.push(Fix::new(0.0, 0.0, 5.0, 0)).await;
        assert!(matches!(result, Err(EnvError::SourceClosed)));
    }

    #[tokio::test]
    async fn test_store_rejects_duplicate_run() {
        let store = MemoryRunStore::new();
        let owner = OwnerId::from_seed(1);
        store.save_run(record(1, owner, None)).await.unwrap();

        let again = store.save_run(record(1, owner, None)).await;
        assert!(matches!(again, Err(EnvError::DuplicateRun(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_store_filters_territories_by_owner() {
        let store = MemoryRunStore::new();
        let alice = OwnerId::from_seed(1);
        let bob = OwnerId::from_seed(2);
        let ring = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.001, 0.0),
            GeoPoint::new(0.001, 0.001),
            GeoPoint::new(0.0, 0.0),
        ];

        store.save_run(record(1, alice, Some(ring.clone()))).await.unwrap();
        store.save_run(record(2, alice, None)).await.unwrap();
        store.save_run(record(3, bob, Some(ring))).await.unwrap();

        assert_eq!(store.territories(None).await.unwrap().len(), 2);
        let alices = store.territories(Some(alice)).await.unwrap();
        assert_eq!(alices.len(), 1);
        assert_eq!(alices[0].0, alice);
        assert_eq!(store.runs_for(alice).await.unwrap().len(), 2);
    }
}
