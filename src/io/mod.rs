//! IO modules - external system interfaces
//!
//! - `broker` - Broker link seam (`BrokerConnector`, `BrokerChannel`)
//! - `amqp` - RabbitMQ implementation of the broker seam
//! - `publisher` - Shared publisher with retry, reconnect and deadlines
//! - `digest` - HTTP digest authentication
//! - `dahua` - Barrier controller client (openDoor)
//! - `http_api` - Inbound HTTP routes, health and Prometheus metrics

pub mod amqp;
pub mod broker;
pub mod dahua;
pub mod digest;
pub mod http_api;
pub mod publisher;

// Re-export commonly used types
pub use amqp::{AmqpConfig, AmqpConnector};
pub use broker::{BrokerChannel, BrokerConnector, ChannelError};
pub use dahua::{BarrierActuator, DahuaClient, DeviceError, GateError};
pub use http_api::{serve, AppState};
pub use publisher::{PublishError, Publisher, RetryPolicy};
