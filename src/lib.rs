//! Outbound message dispatch queue.
//!
//! Drains a durable per-account queue of notification messages through a
//! rate-limited external channel: single oldest-eligible selection, an
//! at-most-one-in-flight claim per account, jittered inter-message delays,
//! batch cool-downs and an optional daily cap, with event-driven loop
//! activation instead of polling.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::dispatcher::{Dispatcher, DispatcherConfig};
pub use application::services::send_channel::{SendChannel, SendError};
pub use application::trigger::ActivationTrigger;
pub use domain::models::{ChannelStatus, MessageStatus, OutboundMessage, RatePolicy};
