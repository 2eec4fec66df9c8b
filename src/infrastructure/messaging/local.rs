use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    application::{dispatcher::Dispatcher, services::event_bus::QueueBus},
    domain::events::MessageQueuedEvent,
};

/// In-process bus for tests and single-binary deployments; same
/// `(bus, worker)` shape as the jetstream pair.
pub struct LocalBus {
    tx: mpsc::UnboundedSender<MessageQueuedEvent>,
}

impl LocalBus {
    pub fn new() -> (Arc<Self>, LocalWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), LocalWorker { rx })
    }
}

#[async_trait]
impl QueueBus for LocalBus {
    async fn publish(&self, event: MessageQueuedEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow::anyhow!("local bus worker dropped"))?;
        Ok(())
    }
}

pub struct LocalWorker {
    rx: mpsc::UnboundedReceiver<MessageQueuedEvent>,
}

impl LocalWorker {
    pub fn spawn(mut self, dispatcher: Arc<Dispatcher>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = self.rx.recv().await {
                dispatcher.activate(event.account_id);
            }
        })
    }
}
