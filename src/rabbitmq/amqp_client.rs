// src/rabbitmq/amqp_client.rs

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection};
use std::error::Error;
use std::fmt::Debug;
use std::future::Future;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::env::RabbitMQConfig;
use crate::rabbitmq::connection;
use crate::rabbitmq::errors::{RabbitMQError, Result};
use crate::rabbitmq::tls_details::{self, TlsDetails};

const DELIVERY_MODE_TRANSIENT: u8 = 1;
const DELIVERY_MODE_PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// Operations offered on the configured queue.
#[async_trait]
pub trait AmqpClientTrait {
    /// Error type associated with this client
    type Error: Error + Debug;

    /// Open the connection and channel and declare the queue, unless already open.
    async fn establish_connection(&mut self) -> std::result::Result<(), Self::Error>;

    /// Publish `body` to the queue through the default exchange.
    async fn publish_message(&mut self, body: &[u8], persistent: bool) -> std::result::Result<(), Self::Error>;

    /// Number of ready messages in the queue.
    async fn get_message_count(&mut self) -> std::result::Result<u32, Self::Error>;

    /// Close channel and connection; never fails.
    async fn close_connections(&mut self);

    /// Whether the queue is reachable; never fails.
    async fn health_check(&mut self) -> bool;

    /// TLS session details; never fails.
    async fn tls_details(&self) -> TlsDetails;
}

// Connection and channel only ever exist together.
struct Session {
    connection: Connection,
    channel: Channel,
}

impl Session {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

pub struct RabbitMQClient {
    config: RabbitMQConfig,
    session: Option<Session>,
}

impl RabbitMQClient {
    pub fn new(config: RabbitMQConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(RabbitMQConfig::load()?))
    }

    pub fn config(&self) -> &RabbitMQConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_open)
    }

    fn open_channel(&self) -> Option<&Channel> {
        self.session
            .as_ref()
            .map(|session| &session.channel)
            .filter(|channel| channel.status().connected())
    }

    fn connection_open(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.connection.status().connected())
    }

    pub async fn establish_connection(&mut self) -> Result<()> {
        if self.is_connected() {
            debug!("Connection already established");
            return Ok(());
        }
        // Drop any half-closed leftovers before reconnecting.
        self.close_connections().await;

        let connection = connection::connect(&self.config).await?;
        let setup = setup_channel(&connection, &self.config).await;
        let channel = close_on_failure(setup, || {
            connection.close(REPLY_SUCCESS, "Channel setup failed")
        })
        .await?;

        info!(queue = %self.config.queue_name, "Declared durable queue");
        self.session = Some(Session { connection, channel });
        Ok(())
    }

    pub async fn publish_message(&mut self, body: impl AsRef<[u8]>, persistent: bool) -> Result<()> {
        let channel = self.open_channel().ok_or(RabbitMQError::NotConnected)?;

        let properties = publish_properties(persistent);

        // A blocked connection stalls publishes; bound the wait.
        let limit = self.config.blocked_timeout();
        let confirm = timeout(
            limit,
            channel.basic_publish(
                "",
                &self.config.queue_name,
                BasicPublishOptions::default(),
                body.as_ref(),
                properties,
            ),
        )
        .await?
        .map_err(|e| RabbitMQError::PublishError(e.to_string()))?;

        let confirmation = timeout(limit, confirm)
            .await?
            .map_err(|e| RabbitMQError::PublishError(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(RabbitMQError::PublishError(format!(
                "Broker rejected message for queue '{}'",
                self.config.queue_name
            )));
        }

        debug!(
            queue = %self.config.queue_name,
            bytes = body.as_ref().len(),
            persistent,
            "Published message"
        );
        Ok(())
    }

    pub async fn get_message_count(&mut self) -> Result<u32> {
        if self.open_channel().is_none() {
            self.establish_connection().await?;
        }
        let channel = self.open_channel().ok_or(RabbitMQError::NotConnected)?;

        let queue = channel
            .queue_declare(
                &self.config.queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(queue.message_count())
    }

    pub async fn close_connections(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if session.channel.status().connected() {
            if let Err(e) = session.channel.close(REPLY_SUCCESS, "Closing channel").await {
                debug!(error = %e, "Ignoring error while closing channel");
            }
        }
        if session.connection.status().connected() {
            if let Err(e) = session.connection.close(REPLY_SUCCESS, "Closing connection").await {
                debug!(error = %e, "Ignoring error while closing connection");
            }
        }
        info!("Closed RabbitMQ connection");
    }

    pub async fn health_check(&mut self) -> bool {
        match self.check_queue().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, queue = %self.config.queue_name, "Health check failed");
                false
            }
        }
    }

    async fn check_queue(&mut self) -> Result<()> {
        if !self.connection_open() {
            self.establish_connection().await?;
        }
        let channel = self.open_channel().ok_or(RabbitMQError::NotConnected)?;

        channel
            .queue_declare(
                &self.config.queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    pub async fn tls_details(&self) -> TlsDetails {
        if !self.connection_open() {
            return TlsDetails::disabled();
        }
        if !self.config.use_tls {
            return TlsDetails::disabled();
        }

        match tls_details::inspect(&self.config).await {
            Ok(details) => details,
            Err(e) => {
                debug!(error = %e, "Could not inspect TLS session");
                TlsDetails {
                    tls: true,
                    server_name: Some(self.config.effective_server_hostname().to_string()),
                    ..TlsDetails::default()
                }
            }
        }
    }
}

/// Opens a channel on `connection`, enables confirms if configured and declares the durable queue.
async fn setup_channel(connection: &Connection, config: &RabbitMQConfig) -> Result<Channel> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| RabbitMQError::ChannelError(format!("Failed to create channel: {}", e)))?;

    if config.publisher_confirms {
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| RabbitMQError::ChannelError(format!("Failed to enable publisher confirms: {}", e)))?;
    }

    channel
        .queue_declare(
            &config.queue_name,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| {
            RabbitMQError::ChannelError(format!(
                "Failed to declare queue '{}': {}",
                config.queue_name, e
            ))
        })?;

    Ok(channel)
}

// lapin keeps a dropped connection alive, so a failed setup must close it explicitly.
async fn close_on_failure<T, F, Fut>(result: Result<T>, close: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<(), lapin::Error>>,
{
    if let Err(e) = &result {
        warn!(error = %e, "Closing connection after failed channel setup");
        if let Err(close_err) = close().await {
            debug!(error = %close_err, "Ignoring error while closing connection");
        }
    }
    result
}

fn publish_properties(persistent: bool) -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(if persistent {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        })
        .with_message_id(Uuid::new_v4().to_string().into())
        .with_timestamp(chrono::Utc::now().timestamp() as u64)
}

#[async_trait]
impl AmqpClientTrait for RabbitMQClient {
    type Error = RabbitMQError;

    async fn establish_connection(&mut self) -> Result<()> {
        RabbitMQClient::establish_connection(self).await
    }

    async fn publish_message(&mut self, body: &[u8], persistent: bool) -> Result<()> {
        RabbitMQClient::publish_message(self, body, persistent).await
    }

    async fn get_message_count(&mut self) -> Result<u32> {
        RabbitMQClient::get_message_count(self).await
    }

    async fn close_connections(&mut self) {
        RabbitMQClient::close_connections(self).await
    }

    async fn health_check(&mut self) -> bool {
        RabbitMQClient::health_check(self).await
    }

    async fn tls_details(&self) -> TlsDetails {
        RabbitMQClient::tls_details(self).await
    }
}
