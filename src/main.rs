use anyhow::{Context, Result};
use rabbitmq_poc::{AmqpClientTrait, RabbitMQClient, RabbitMQConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RabbitMQConfig::load().context("Failed to load RabbitMQ configuration")?;
    let queue_name = config.queue_name.clone();
    let mut client = RabbitMQClient::new(config);

    let outcome = run(&mut client, &queue_name).await;
    client.close_connections().await;
    outcome
}

async fn run<C>(client: &mut C, queue_name: &str) -> Result<()>
where
    C: AmqpClientTrait + Send + Sync,
    C::Error: Send + Sync + 'static,
{
    client
        .establish_connection()
        .await
        .context("Failed to establish RabbitMQ connection")?;

    client
        .publish_message(b"Hello, RabbitMQ!", true)
        .await
        .context("Failed to publish message")?;

    let count = client
        .get_message_count()
        .await
        .context("Failed to read queue depth")?;
    info!("Message count in queue '{}': {}", queue_name, count);

    let tls_info = client.tls_details().await;
    info!("TLS Details: {}", serde_json::to_string(&tls_info)?);

    Ok(())
}
