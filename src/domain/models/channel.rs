use serde::{Deserialize, Serialize};

/// Most recently recorded state of an account's messaging channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Connected => "connected",
            ChannelStatus::Connecting => "connecting",
            ChannelStatus::Disconnected => "disconnected",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "connected" => Some(ChannelStatus::Connected),
            "connecting" => Some(ChannelStatus::Connecting),
            "disconnected" => Some(ChannelStatus::Disconnected),
            _ => None,
        }
    }

    /// Fail closed: anything other than `connected` blocks dispatch.
    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelStatus::Connected)
    }
}
