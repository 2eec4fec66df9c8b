use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres};
use uuid::Uuid;

use crate::domain::{
    models::{ChannelStatus, MessageStatus, NewOutboundMessage, OutboundMessage, RatePolicy},
    repositories::{ChannelStatusRepository, OutboundMessageRepository, RatePolicyRepository},
};

pub type PgPool = Pool<Postgres>;

const MESSAGE_COLUMNS: &str =
    "id, account_id, recipient, body, status, error_message, due_at, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresOutboundMessageRepository {
    pool: PgPool,
}

impl PostgresOutboundMessageRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl OutboundMessageRepository for PostgresOutboundMessageRepository {
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

        sqlx::query(
            r#"
            INSERT INTO outbound_messages
                (id, account_id, recipient, body, status, due_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(message.id)
        .bind(message.account_id)
        .bind(&message.recipient)
        .bind(&message.body)
        .bind(message.status.as_str())
        .bind(message.due_at)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(message)
    }

    async fn next_eligible(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<OutboundMessage>> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM outbound_messages
            WHERE account_id = $1
              AND status IN ('pending', 'scheduled')
              AND (due_at IS NULL OR due_at <= $2)
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(account_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(OutboundMessage::from))
    }

    async fn update_status(&self, message_id: Uuid, status: MessageStatus) -> anyhow::Result<()> {
        let error_message = match &status {
            MessageStatus::Failed { reason } => Some(reason.clone()),
            _ => None,
        };
        let clear_due = status == MessageStatus::Sent;
        sqlx::query(
            r#"
            UPDATE outbound_messages
            SET status = $2,
                error_message = $3,
                due_at = CASE WHEN $4 THEN NULL ELSE due_at END,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(clear_due)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, message_id: Uuid) -> anyhow::Result<Option<OutboundMessage>> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM outbound_messages WHERE id = $1"#
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(OutboundMessage::from))
    }

    async fn list_by_account(
        &self,
        account_id: Uuid,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> anyhow::Result<(Vec<OutboundMessage>, bool)> {
        let limit = limit.unwrap_or(50) as i64;
        let offset = offset.unwrap_or(0) as i64;

        // Fetch one extra row to learn whether another page exists.
        let mut records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM outbound_messages
            WHERE account_id = $1
            ORDER BY created_at ASC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(account_id)
        .bind(limit + 1)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let has_more = records.len() as i64 > limit;
        records.truncate(limit as usize);
        Ok((
            records.into_iter().map(OutboundMessage::from).collect(),
            has_more,
        ))
    }

    async fn accounts_with_eligible(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT account_id FROM outbound_messages
            WHERE status IN ('pending', 'scheduled')
              AND (due_at IS NULL OR due_at <= $1)
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(account_id,)| account_id).collect())
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    account_id: Uuid,
    recipient: String,
    body: String,
    status: String,
    error_message: Option<String>,
    due_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MessageRecord> for OutboundMessage {
    fn from(record: MessageRecord) -> Self {
        let status = MessageStatus::from_parts(&record.status, record.error_message)
            .unwrap_or(MessageStatus::Pending);
        Self {
            id: record.id,
            account_id: record.account_id,
            recipient: record.recipient,
            body: record.body,
            status,
            due_at: record.due_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PostgresRatePolicyRepository {
    pool: PgPool,
}

impl PostgresRatePolicyRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl RatePolicyRepository for PostgresRatePolicyRepository {
    async fn get(&self, account_id: Uuid) -> anyhow::Result<Option<RatePolicy>> {
        let record = sqlx::query_as::<_, RatePolicyRecord>(
            r#"
            SELECT min_interval_s, max_interval_s, batch_size, batch_cooldown_s,
                   daily_cap, jitter_enabled, active
            FROM rate_policies WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(RatePolicy::from))
    }

    async fn upsert(&self, account_id: Uuid, policy: RatePolicy) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rate_policies
                (account_id, min_interval_s, max_interval_s, batch_size, batch_cooldown_s,
                 daily_cap, jitter_enabled, active, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (account_id) DO UPDATE
            SET min_interval_s = EXCLUDED.min_interval_s,
                max_interval_s = EXCLUDED.max_interval_s,
                batch_size = EXCLUDED.batch_size,
                batch_cooldown_s = EXCLUDED.batch_cooldown_s,
                daily_cap = EXCLUDED.daily_cap,
                jitter_enabled = EXCLUDED.jitter_enabled,
                active = EXCLUDED.active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account_id)
        .bind(policy.min_interval_s as i64)
        .bind(policy.max_interval_s as i64)
        .bind(policy.batch_size as i32)
        .bind(policy.batch_cooldown_s as i64)
        .bind(policy.daily_cap.map(|cap| cap as i32))
        .bind(policy.jitter_enabled)
        .bind(policy.active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct RatePolicyRecord {
    min_interval_s: i64,
    max_interval_s: i64,
    batch_size: i32,
    batch_cooldown_s: i64,
    daily_cap: Option<i32>,
    jitter_enabled: bool,
    active: bool,
}

impl From<RatePolicyRecord> for RatePolicy {
    fn from(record: RatePolicyRecord) -> Self {
        Self {
            min_interval_s: record.min_interval_s.max(0) as u64,
            max_interval_s: record.max_interval_s.max(0) as u64,
            batch_size: record.batch_size.max(0) as u32,
            batch_cooldown_s: record.batch_cooldown_s.max(0) as u64,
            daily_cap: record.daily_cap.map(|cap| cap.max(0) as u32),
            jitter_enabled: record.jitter_enabled,
            active: record.active,
        }
    }
}

#[derive(Clone)]
pub struct PostgresChannelStatusRepository {
    pool: PgPool,
}

impl PostgresChannelStatusRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl ChannelStatusRepository for PostgresChannelStatusRepository {
    async fn get(&self, account_id: Uuid) -> anyhow::Result<ChannelStatus> {
        let row: Option<(String,)> =
            sqlx::query_as(r#"SELECT status FROM channel_statuses WHERE account_id = $1"#)
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row
            .and_then(|(status,)| ChannelStatus::from_str(&status))
            .unwrap_or(ChannelStatus::Disconnected))
    }

    async fn set(&self, account_id: Uuid, status: ChannelStatus) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO channel_statuses (account_id, status, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id) DO UPDATE
            SET status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
