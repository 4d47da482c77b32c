// src/rabbitmq/connection.rs

use lapin::tcp::{HandshakeError, RustlsConnector, TcpStream};
use lapin::uri::AMQPUri;
use lapin::{Connection, ConnectionProperties};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::env::RabbitMQConfig;
use crate::rabbitmq::errors::{RabbitMQError, Result};
use crate::rabbitmq::tls::{install_crypto_provider, TlsMaterial};

/// Builds the broker URI: endpoint, credentials, vhost, heartbeat and SASL mechanism.
pub fn build_uri(config: &RabbitMQConfig) -> Result<AMQPUri> {
    let scheme = if config.use_tls { "amqps" } else { "amqp" };
    let query = if config.uses_external_auth() {
        "?auth_mechanism=external"
    } else {
        ""
    };

    let mut uri: AMQPUri = format!("{}://{}:{}/{}", scheme, config.host, config.port, query)
        .parse()
        .map_err(|e| {
            RabbitMQError::ConfigError(format!(
                "Invalid broker address {}:{}: {}",
                config.host, config.port, e
            ))
        })?;

    // Set after parsing so credentials and vhost need no percent-encoding.
    uri.authority.userinfo.username = config.username.clone();
    uri.authority.userinfo.password = config.password.clone();
    uri.vhost = config.virtual_host.clone();
    uri.query.heartbeat = Some(config.heartbeat);

    Ok(uri)
}

pub fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

/// Opens a broker connection, using TLS material when the config enables it.
pub async fn connect(config: &RabbitMQConfig) -> Result<Connection> {
    let tls = if config.use_tls {
        install_crypto_provider();
        Some(TlsMaterial::load(config)?)
    } else {
        None
    };

    if config.uses_external_auth() {
        info!("Using EXTERNAL authentication with client certificates");
    }

    let uri = build_uri(config)?;
    info!(
        host = %config.host,
        port = config.port,
        vhost = %config.virtual_host,
        tls = config.use_tls,
        "Connecting to RabbitMQ"
    );

    let connect = async {
        match tls {
            Some(material) => {
                // rustls config carries verify_peer; SNI and name checks use the effective hostname.
                let connector = RustlsConnector::from(material.client_config(config.verify_peer)?);
                let server_name = config.effective_server_hostname().to_string();
                debug!(
                    server_name = %server_name,
                    verify_peer = config.verify_peer,
                    "Opening TLS connection"
                );

                Connection::connector(
                    uri,
                    Box::new(move |uri: &AMQPUri| {
                        match TcpStream::connect((uri.authority.host.as_str(), uri.authority.port)) {
                            Ok(stream) => stream.into_rustls(&connector, &server_name),
                            Err(e) => Err(HandshakeError::Failure(e)),
                        }
                    }),
                    connection_properties(),
                )
                .await
                .map_err(RabbitMQError::from)
            }
            None => Connection::connect_uri(uri, connection_properties())
                .await
                .map_err(RabbitMQError::from),
        }
    };

    let connection = timeout(config.connect_timeout(), connect)
        .await?
        .map_err(|e| match e {
            RabbitMQError::TlsError(_) => e,
            other => RabbitMQError::ConnectionError(format!("Failed to connect: {}", other)),
        })?;

    info!("Successfully connected to RabbitMQ");
    Ok(connection)
}
