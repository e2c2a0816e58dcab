//! Broker connection seam
//!
//! The publisher only knows how to open a link and push bytes through it.
//! `io::amqp` provides the RabbitMQ implementation; tests plug in stubs.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single broker operation, classified for the retry policy
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// Connection dropped, channel closed, connect refused. Reconnect and retry.
    #[error("transient broker error: {0}")]
    Transient(String),
    /// Broker refused the message (nack, unroutable, protocol refusal, encoding). Do not retry.
    #[error("broker rejected message: {0}")]
    Rejected(String),
}

/// An open, confirm-enabled path to the configured exchange
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Publish one message and wait for the broker's confirmation
    async fn publish(&self, payload: &[u8]) -> Result<(), ChannelError>;

    /// Release the underlying connection
    async fn close(&self);
}

/// Opens broker links
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, ChannelError>;
}
