use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    models::{ChannelStatus, MessageStatus, NewOutboundMessage, OutboundMessage, RatePolicy},
    repositories::{ChannelStatusRepository, OutboundMessageRepository, RatePolicyRepository},
};

struct StoredMessage {
    message: OutboundMessage,
    // Insertion order breaks created_at ties so selection stays
    // deterministic under fast consecutive inserts.
    seq: u64,
}

#[derive(Default)]
pub struct InMemoryOutboundMessageRepository {
    messages: Arc<RwLock<HashMap<Uuid, StoredMessage>>>,
    next_seq: Arc<RwLock<u64>>,
}

impl InMemoryOutboundMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboundMessageRepository for InMemoryOutboundMessageRepository {
    async fn insert(&self, new: NewOutboundMessage) -> anyhow::Result<OutboundMessage> {
        let now = Utc::now();
        let status = if new.due_at.is_some() {
            MessageStatus::Scheduled
        } else {
            MessageStatus::Pending
        };
        let message = OutboundMessage {
            id: Uuid::new_v4(),
            account_id: new.account_id,
            recipient: new.recipient,
            body: new.body,
            status,
            due_at: new.due_at,
            created_at: now,
            updated_at: now,
        };

        let seq = {
            let mut next = self.next_seq.write().await;
            *next += 1;
            *next
        };
        let mut messages = self.messages.write().await;
        messages.insert(
            message.id,
            StoredMessage {
                message: message.clone(),
                seq,
            },
        );
        Ok(message)
    }

    async fn next_eligible(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<OutboundMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .filter(|stored| {
                stored.message.account_id == account_id && stored.message.is_eligible(now)
            })
            .min_by_key(|stored| (stored.message.created_at, stored.seq))
            .map(|stored| stored.message.clone()))
    }

    async fn update_status(&self, message_id: Uuid, status: MessageStatus) -> anyhow::Result<()> {
        let mut messages = self.messages.write().await;
        if let Some(stored) = messages.get_mut(&message_id) {
            if status == MessageStatus::Sent {
                stored.message.due_at = None;
            }
            stored.message.status = status;
            stored.message.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get(&self, message_id: Uuid) -> anyhow::Result<Option<OutboundMessage>> {
        let messages = self.messages.read().await;
        Ok(messages.get(&message_id).map(|stored| stored.message.clone()))
    }

    async fn list_by_account(
        &self,
        account_id: Uuid,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> anyhow::Result<(Vec<OutboundMessage>, bool)> {
        let limit = limit.unwrap_or(50) as usize;
        let offset = offset.unwrap_or(0) as usize;

        let messages = self.messages.read().await;
        let mut rows: Vec<&StoredMessage> = messages
            .values()
            .filter(|stored| stored.message.account_id == account_id)
            .collect();
        rows.sort_by_key(|stored| (stored.message.created_at, stored.seq));

        let has_more = rows.len() > offset + limit;
        let page = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|stored| stored.message.clone())
            .collect();
        Ok((page, has_more))
    }

    async fn accounts_with_eligible(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        let messages = self.messages.read().await;
        let mut accounts: Vec<Uuid> = messages
            .values()
            .filter(|stored| stored.message.is_eligible(now))
            .map(|stored| stored.message.account_id)
            .collect();
        accounts.sort();
        accounts.dedup();
        Ok(accounts)
    }
}

#[derive(Default)]
pub struct InMemoryRatePolicyRepository {
    policies: Arc<RwLock<HashMap<Uuid, RatePolicy>>>,
}

impl InMemoryRatePolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RatePolicyRepository for InMemoryRatePolicyRepository {
    async fn get(&self, account_id: Uuid) -> anyhow::Result<Option<RatePolicy>> {
        let policies = self.policies.read().await;
        Ok(policies.get(&account_id).cloned())
    }

    async fn upsert(&self, account_id: Uuid, policy: RatePolicy) -> anyhow::Result<()> {
        let mut policies = self.policies.write().await;
        policies.insert(account_id, policy);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryChannelStatusRepository {
    statuses: Arc<RwLock<HashMap<Uuid, ChannelStatus>>>,
}

impl InMemoryChannelStatusRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelStatusRepository for InMemoryChannelStatusRepository {
    async fn get(&self, account_id: Uuid) -> anyhow::Result<ChannelStatus> {
        let statuses = self.statuses.read().await;
        Ok(statuses
            .get(&account_id)
            .copied()
            .unwrap_or(ChannelStatus::Disconnected))
    }

    async fn set(&self, account_id: Uuid, status: ChannelStatus) -> anyhow::Result<()> {
        let mut statuses = self.statuses.write().await;
        statuses.insert(account_id, status);
        Ok(())
    }
}
