use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    application::services::event_bus::QueueBus,
    domain::{
        errors::DomainError,
        events::MessageQueuedEvent,
        models::NewOutboundMessage,
        repositories::OutboundMessageRepository,
    },
};

pub struct EnqueueMessageUseCase {
    queue: Arc<dyn OutboundMessageRepository>,
    bus: Arc<dyn QueueBus>,
}

pub struct EnqueueMessageRequest {
    pub account_id: Uuid,
    pub recipient: String,
    pub body: String,
    pub due_at: Option<DateTime<Utc>>,
}

pub struct EnqueueMessageResponse {
    pub message_id: Uuid,
}

impl EnqueueMessageUseCase {
    pub fn new(queue: Arc<dyn OutboundMessageRepository>, bus: Arc<dyn QueueBus>) -> Self {
        Self { queue, bus }
    }

    pub async fn execute(
        &self,
        request: EnqueueMessageRequest,
    ) -> Result<EnqueueMessageResponse, DomainError> {
        if request.recipient.trim().is_empty() {
            return Err(DomainError::Validation("recipient must not be empty".into()));
        }
        if request.body.trim().is_empty() {
            return Err(DomainError::Validation("body must not be empty".into()));
        }

        let message = self
            .queue
            .insert(NewOutboundMessage {
                account_id: request.account_id,
                recipient: request.recipient,
                body: request.body,
                due_at: request.due_at,
            })
            .await?;

        self.bus
            .publish(MessageQueuedEvent {
                event_id: Uuid::new_v4(),
                account_id: message.account_id,
                message_id: message.id,
                queued_at: Utc::now(),
            })
            .await?;

        Ok(EnqueueMessageResponse {
            message_id: message.id,
        })
    }
}
