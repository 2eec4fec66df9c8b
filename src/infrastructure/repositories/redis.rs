use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::domain::{models::ChannelStatus, repositories::ChannelStatusRepository};

/// Channel connectivity backed by redis; the reconnect flow that manages the
/// channel session writes the same keys.
pub struct RedisChannelStatusRepository {
    client: redis::Client,
}

impl RedisChannelStatusRepository {
    pub fn new(redis_url: &str) -> anyhow::Result<Arc<Self>> {
        let client = redis::Client::open(redis_url)?;
        Ok(Arc::new(Self { client }))
    }

    fn key(account_id: Uuid) -> String {
        format!("channel_status:{account_id}")
    }
}

#[async_trait]
impl ChannelStatusRepository for RedisChannelStatusRepository {
    async fn get(&self, account_id: Uuid) -> anyhow::Result<ChannelStatus> {
        let mut conn = self.client.get_async_connection().await?;
        let value: Option<String> = conn.get(Self::key(account_id)).await?;
        Ok(value
            .as_deref()
            .and_then(ChannelStatus::from_str)
            .unwrap_or(ChannelStatus::Disconnected))
    }

    async fn set(&self, account_id: Uuid, status: ChannelStatus) -> anyhow::Result<()> {
        let mut conn = self.client.get_async_connection().await?;
        let _: () = conn.set(Self::key(account_id), status.as_str()).await?;
        Ok(())
    }
}
