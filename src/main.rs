use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use outbox::{
    ActivationTrigger, Dispatcher, DispatcherConfig,
    config::Config,
    infrastructure::{
        channels::whatsapp::WhatsAppGatewayClient,
        messaging::jetstream::JetstreamBus,
        repositories::{
            postgres::{PostgresOutboundMessageRepository, PostgresRatePolicyRepository},
            redis::RedisChannelStatusRepository,
        },
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::try_parse().map_err(|err| anyhow::anyhow!(err))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let queue = PostgresOutboundMessageRepository::new(pool.clone());
    let policies = PostgresRatePolicyRepository::new(pool);
    let channel_status = RedisChannelStatusRepository::new(&config.redis_url)?;
    let channel =
        WhatsAppGatewayClient::new(config.gateway_base_url.clone(), config.gateway_api_key.clone());

    let dispatcher = Dispatcher::new(
        queue.clone(),
        policies,
        channel_status,
        channel,
        DispatcherConfig {
            default_country_code: config.default_country_code.clone(),
        },
    );

    // Pick up anything queued while no worker was listening.
    let trigger = ActivationTrigger::new(dispatcher.clone(), queue);
    trigger.reconcile().await?;

    let (_bus, worker) = JetstreamBus::new(&config.jetstream()).await?;
    let worker_handle = worker.spawn(dispatcher);
    info!("outbox dispatcher running");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    worker_handle.abort();
    Ok(())
}
