//! Replay location source.

use async_trait::async_trait;
use std::collections::VecDeque;
use terra_env::{Fix, LocationSource};
use tokio::sync::Mutex;

/// Hands out a pre-generated fix list in order, then reports the provider
/// as stopped.
pub struct ReplaySource {
    queue: Mutex<VecDeque<Fix>>,
}

impl ReplaySource {
    pub fn new(fixes: impl IntoIterator<Item = Fix>) -> Self {
        Self {
            queue: Mutex::new(fixes.into_iter().collect()),
        }
    }

    /// Fixes not yet delivered.
    pub async fn remaining(&self) -> usize {
        self.queue.lock().await.len()
    }
}

#[async_trait]
impl LocationSource for ReplaySource {
    async fn next_fix(&self) -> Option<Fix> {
        self.queue.lock().await.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replay_in_order_then_stops() {
        let source = ReplaySource::new((0..3).map(|k| Fix::new(1.0, 1.0, 5.0, k * 1_000)));

        assert_eq!(source.next_fix().await.map(|f| f.timestamp_ms), Some(0));
        assert_eq!(source.remaining().await, 2);
        assert_eq!(source.next_fix().await.map(|f| f.timestamp_ms), Some(1_000));
        assert_eq!(source.next_fix().await.map(|f| f.timestamp_ms), Some(2_000));
        assert!(source.next_fix().await.is_none());
    }
}
