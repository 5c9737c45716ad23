use async_trait::async_trait;
use questline_core::{PlayerDeliveryState, PlayerKey, Result};

/// Port to the persistence layer owning per-player delivery state.
///
/// Assumed durable and crash-safe; the core relies on a state read
/// immediately after a save reflecting that save.
#[async_trait]
pub trait PlayerStore: Send + Sync {
    async fn load(&self, key: &PlayerKey) -> Result<PlayerDeliveryState>;

    async fn save(&self, key: &PlayerKey, state: &PlayerDeliveryState) -> Result<()>;
}
