use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Scheduled,
    Sent,
    Failed { reason: String },
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Scheduled => "scheduled",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed { .. } => "failed",
        }
    }

    pub fn from_parts(status: &str, reason: Option<String>) -> Option<Self> {
        match status {
            "pending" => Some(MessageStatus::Pending),
            "scheduled" => Some(MessageStatus::Scheduled),
            "sent" => Some(MessageStatus::Sent),
            "failed" => Some(MessageStatus::Failed {
                reason: reason.unwrap_or_default(),
            }),
            _ => None,
        }
    }

    /// A message in a terminal status is never selected again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Sent | MessageStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub account_id: Uuid,
    pub recipient: String,
    pub body: String,
    pub status: MessageStatus,
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboundMessage {
    /// Eligible for dispatch: non-terminal and either not deferred or due.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.due_at.is_none_or(|due| due <= now)
    }
}

/// Payload for enqueueing; the store assigns id, status and timestamps.
#[derive(Debug, Clone)]
pub struct NewOutboundMessage {
    pub account_id: Uuid,
    pub recipient: String,
    pub body: String,
    pub due_at: Option<DateTime<Utc>>,
}
