use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Published after a pending/scheduled row lands in the queue store.
///
/// Carries only enough to wake the right account loop; the dispatcher always
/// re-reads the row from the store rather than trusting the event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageQueuedEvent {
    pub event_id: Uuid,
    pub account_id: Uuid,
    pub message_id: Uuid,
    pub queued_at: DateTime<Utc>,
}
