use rabbitmq_poc::{RabbitMQClient, RabbitMQConfig, RabbitMQError};
use std::io::ErrorKind;
use std::path::PathBuf;

fn tls_config(ca_cert: Option<PathBuf>) -> RabbitMQConfig {
    RabbitMQConfig {
        use_tls: true,
        port: 5671,
        ca_cert,
        ..RabbitMQConfig::default()
    }
}

#[tokio::test]
async fn missing_ca_file_raises_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = RabbitMQClient::new(tls_config(Some(dir.path().join("ca.pem"))));

    let err = client.establish_connection().await.unwrap_err();
    assert_eq!(err.io_kind(), Some(ErrorKind::NotFound));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn unset_ca_path_is_reported() {
    let mut client = RabbitMQClient::new(tls_config(None));

    let err = client.establish_connection().await.unwrap_err();
    assert!(matches!(err, RabbitMQError::MissingTlsPath { label: "CA certificate" }));
}

#[tokio::test]
async fn publish_before_connect_raises() {
    let mut client = RabbitMQClient::new(RabbitMQConfig::default());

    let err = client.publish_message(b"payload".as_slice(), false).await.unwrap_err();
    assert!(matches!(err, RabbitMQError::NotConnected));
}

#[tokio::test]
async fn tls_details_before_connect_reports_no_tls() {
    let dir = tempfile::tempdir().unwrap();
    let client = RabbitMQClient::new(tls_config(Some(dir.path().join("ca.pem"))));

    let details = client.tls_details().await;
    assert!(!details.tls);
    assert_eq!(serde_json::to_string(&details).unwrap(), r#"{"tls":false}"#);
}
