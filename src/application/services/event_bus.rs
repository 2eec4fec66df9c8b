use async_trait::async_trait;

use crate::domain::events::MessageQueuedEvent;

/// Producer side of the wake-up feed: anything that inserts a queue row
/// publishes the matching event here.
#[async_trait]
pub trait QueueBus: Send + Sync {
    async fn publish(&self, event: MessageQueuedEvent) -> anyhow::Result<()>;
}
