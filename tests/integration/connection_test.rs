// These need a broker reachable through the RABBITMQ_* environment variables.

use rabbitmq_poc::{RabbitMQClient, RabbitMQConfig};
use uuid::Uuid;

fn scratch_client() -> RabbitMQClient {
    let mut config = RabbitMQConfig::load().expect("Failed to load config from environment");
    config.queue_name = format!("rabbitmq_poc_test_{}", Uuid::new_v4());
    RabbitMQClient::new(config)
}

#[tokio::test]
#[ignore] // Ignore by default as it requires a running RabbitMQ instance
async fn test_connection_establishes() {
    let mut client = scratch_client();

    client.establish_connection().await.unwrap();
    assert!(client.is_connected());

    // Second call reuses the open session.
    client.establish_connection().await.unwrap();
    assert!(client.is_connected());

    assert!(client.health_check().await);
    client.close_connections().await;
    assert!(!client.is_connected());
}

#[tokio::test]
#[ignore]
async fn test_publish_increments_message_count() {
    let mut client = scratch_client();
    client.establish_connection().await.unwrap();

    let before = client.get_message_count().await.unwrap();
    client.publish_message("Hello, RabbitMQ!", true).await.unwrap();
    client.publish_message(b"transient".as_slice(), false).await.unwrap();

    // Depth is eventually consistent right after a publish.
    let mut after = before;
    for _ in 0..20 {
        after = client.get_message_count().await.unwrap();
        if after >= before + 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert_eq!(after, before + 2);

    client.close_connections().await;
}

#[tokio::test]
#[ignore]
async fn test_message_count_reconnects_after_close() {
    let mut client = scratch_client();
    client.establish_connection().await.unwrap();
    client.close_connections().await;

    assert!(client.get_message_count().await.is_ok());
    assert!(client.is_connected());
    client.close_connections().await;
}

#[tokio::test]
#[ignore]
async fn test_failed_queue_declare_leaves_client_disconnected() {
    use lapin::options::QueueDeclareOptions;
    use lapin::types::FieldTable;
    use rabbitmq_poc::rabbitmq::connection::connect;

    let mut client = scratch_client();
    let config = client.config().clone();

    // A transient queue of the same name makes the durable declare fail.
    let other = connect(&config).await.unwrap();
    let channel = other.create_channel().await.unwrap();
    channel
        .queue_declare(&config.queue_name, QueueDeclareOptions::default(), FieldTable::default())
        .await
        .unwrap();

    assert!(client.establish_connection().await.is_err());
    assert!(!client.is_connected());
    assert!(!client.health_check().await);

    other.close(200, "Done").await.unwrap();
}
