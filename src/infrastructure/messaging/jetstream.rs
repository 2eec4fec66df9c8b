use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{AckPolicy, PullConsumer, pull},
};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{error, warn};

use crate::{
    application::{dispatcher::Dispatcher, services::event_bus::QueueBus},
    domain::events::MessageQueuedEvent,
};

#[derive(Clone)]
pub struct JetstreamConfig {
    pub url: String,
    pub stream: String,
    pub subject: String,
    pub durable: String,
    pub pull_batch: usize,
    pub ack_wait_seconds: u64,
}

impl Default for JetstreamConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: "OUTBOX_WAKE".to_string(),
            subject: "outbox.queued".to_string(),
            durable: "outbox-dispatcher".to_string(),
            pull_batch: 64,
            ack_wait_seconds: 30,
        }
    }
}

pub struct JetstreamBus {
    context: jetstream::Context,
    subject: String,
}

impl JetstreamBus {
    pub async fn new(config: &JetstreamConfig) -> anyhow::Result<(Arc<Self>, JetstreamWorker)> {
        let client = async_nats::connect(&config.url).await?;
        let context = jetstream::new(client);

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream.clone(),
                subjects: vec![config.subject.clone()],
                ..Default::default()
            })
            .await?;

        let consumer = stream
            .get_or_create_consumer(
                &config.durable,
                pull::Config {
                    durable_name: Some(config.durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(config.ack_wait_seconds),
                    ..Default::default()
                },
            )
            .await?;

        let bus = Arc::new(Self {
            context,
            subject: config.subject.clone(),
        });

        let worker = JetstreamWorker {
            consumer,
            pull_batch: config.pull_batch,
        };

        Ok((bus, worker))
    }
}

#[async_trait::async_trait]
impl QueueBus for JetstreamBus {
    async fn publish(&self, event: MessageQueuedEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&event)?;
        self.context
            .publish(self.subject.clone(), payload.into())
            .await?;
        Ok(())
    }
}

/// Pull consumer that turns queued events into loop activations.
///
/// Aborting the returned handle only stops future activations; loops already
/// spawned keep running to completion.
pub struct JetstreamWorker {
    consumer: PullConsumer,
    pull_batch: usize,
}

impl JetstreamWorker {
    pub fn spawn(self, dispatcher: Arc<Dispatcher>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.run(dispatcher).await {
                error!(error = %err, "jetstream worker stopped");
            }
        })
    }

    async fn run(self, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
        loop {
            let mut batch = self
                .consumer
                .batch()
                .max_messages(self.pull_batch)
                .messages()
                .await?;
            while let Some(message) = batch.next().await {
                match message {
                    Ok(msg) => {
                        match serde_json::from_slice::<MessageQueuedEvent>(&msg.payload) {
                            Ok(event) => dispatcher.activate(event.account_id),
                            Err(err) => {
                                warn!(error = %err, "dropping malformed queued event");
                            }
                        }
                        // Activation is idempotent and the queue row is the
                        // source of truth, so the event is always acked.
                        if let Err(err) = msg.ack().await {
                            warn!(error = %err, "failed to ack queued event");
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "jetstream batch error");
                    }
                }
            }
        }
    }
}
