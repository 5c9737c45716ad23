use async_trait::async_trait;
use questline_core::{MessageId, PlayerKey, Result};

/// Port to the chat transport, used only to surface progress, conflict
/// and error text. The core does not depend on formatting details.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, key: &PlayerKey, text: &str) -> Result<MessageId>;

    /// Edit `message_id` in place when given, otherwise send a new
    /// message; returns the id of the message that now holds `text`.
    async fn send_or_update(
        &self,
        key: &PlayerKey,
        text: &str,
        message_id: Option<MessageId>,
    ) -> Result<MessageId>;
}
