// src/rabbitmq/mod.rs
// Single-queue RabbitMQ client built on lapin

pub mod amqp_client;
pub mod connection;
pub mod errors;
pub mod tls;
pub mod tls_details;

// Re-export specific items to simplify imports elsewhere
pub use amqp_client::{AmqpClientTrait, RabbitMQClient};
pub use errors::{RabbitMQError, Result};
pub use tls_details::TlsDetails;
