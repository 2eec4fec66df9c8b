use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::models::{
    ChannelStatus, MessageStatus, NewOutboundMessage, OutboundMessage, RatePolicy,
};

/// Durable queue of outbound messages.
#[async_trait]
pub trait OutboundMessageRepository: Send + Sync {
    /// Inserts a new row; status is `pending`, or `scheduled` when a due
    /// time is given.
    async fn insert(&self, message: NewOutboundMessage) -> anyhow::Result<OutboundMessage>;

    /// Oldest row for the account with status pending/scheduled whose due
    /// time (if any) has arrived, by `created_at` ascending.
    async fn next_eligible(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<OutboundMessage>>;

    /// Records the terminal outcome of a delivery attempt. Marking a message
    /// `sent` also clears its due time.
    async fn update_status(&self, message_id: Uuid, status: MessageStatus) -> anyhow::Result<()>;

    async fn get(&self, message_id: Uuid) -> anyhow::Result<Option<OutboundMessage>>;

    async fn list_by_account(
        &self,
        account_id: Uuid,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> anyhow::Result<(Vec<OutboundMessage>, bool)>;

    /// Accounts that currently have at least one eligible row; used by the
    /// startup reconciliation scan.
    async fn accounts_with_eligible(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>>;
}

#[async_trait]
pub trait RatePolicyRepository: Send + Sync {
    async fn get(&self, account_id: Uuid) -> anyhow::Result<Option<RatePolicy>>;
    async fn upsert(&self, account_id: Uuid, policy: RatePolicy) -> anyhow::Result<()>;
}

/// Connectivity gate for the account's messaging channel.
#[async_trait]
pub trait ChannelStatusRepository: Send + Sync {
    /// Accounts with no recorded status are treated as disconnected.
    async fn get(&self, account_id: Uuid) -> anyhow::Result<ChannelStatus>;
    async fn set(&self, account_id: Uuid, status: ChannelStatus) -> anyhow::Result<()>;
}
