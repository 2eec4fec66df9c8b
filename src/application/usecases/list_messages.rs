use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{models::OutboundMessage, repositories::OutboundMessageRepository};

/// Per-account history for downstream reporting; terminal sent/failed rows
/// surface here.
pub struct ListMessagesUseCase {
    queue: Arc<dyn OutboundMessageRepository>,
}

pub struct ListMessagesRequest {
    pub account_id: Uuid,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub struct ListMessagesResponse {
    pub messages: Vec<OutboundMessage>,
    pub has_more: bool,
}

impl ListMessagesUseCase {
    pub fn new(queue: Arc<dyn OutboundMessageRepository>) -> Self {
        Self { queue }
    }

    pub async fn execute(
        &self,
        request: ListMessagesRequest,
    ) -> anyhow::Result<ListMessagesResponse> {
        let (messages, has_more) = self
            .queue
            .list_by_account(request.account_id, request.limit, request.offset)
            .await?;
        Ok(ListMessagesResponse { messages, has_more })
    }
}
