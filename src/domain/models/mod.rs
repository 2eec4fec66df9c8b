mod channel;
mod message;
mod policy;

pub use channel::ChannelStatus;
pub use message::{MessageStatus, NewOutboundMessage, OutboundMessage};
pub use policy::RatePolicy;
