use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Delivery failure, split by what it says about the channel.
///
/// `ChannelDown` means the session itself is unusable and further attempts
/// for the account should stop until an external reconnect flow confirms the
/// channel again; `Rejected` is specific to the one recipient/body and says
/// nothing about the channel.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("channel unavailable: {0}")]
    ChannelDown(String),
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

impl SendError {
    pub fn is_channel_error(&self) -> bool {
        matches!(self, SendError::ChannelDown(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            SendError::ChannelDown(reason) | SendError::Rejected(reason) => reason,
        }
    }
}

/// Opaque send-text call into the external messaging transport.
#[async_trait]
pub trait SendChannel: Send + Sync {
    async fn send(&self, account_id: Uuid, recipient: &str, body: &str) -> Result<(), SendError>;
}
