pub mod enqueue_message;
pub mod list_messages;
