//! Location provider abstraction.

use async_trait::async_trait;

use crate::types::Fix;

/// Abstraction over whatever pulls fixes from the platform.
///
/// # Implementations
///
/// - **Production**: a foreground service bridging the platform location API
/// - **Simulation**: channel-fed replay of synthetic runs
///
/// # Ordering
///
/// Fixes must be delivered one at a time in arrival order. The engine
/// processes each fix completely before asking for the next, so an
/// implementation never needs to buffer for the consumer's sake.
#[async_trait]
pub trait LocationSource: Send + Sync + 'static {
    /// Waits for the next raw fix.
    ///
    /// # Returns
    /// * `Some(fix)` - A fix was delivered
    /// * `None` - The provider stopped (session over)
    async fn next_fix(&self) -> Option<Fix>;
}
