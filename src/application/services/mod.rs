pub mod event_bus;
pub mod send_channel;
