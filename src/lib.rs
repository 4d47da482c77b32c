pub mod env;
pub mod rabbitmq;

pub use env::RabbitMQConfig;
pub use rabbitmq::{AmqpClientTrait, RabbitMQClient, RabbitMQError, TlsDetails};
