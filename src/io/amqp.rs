//! AMQP (RabbitMQ) broker link
//!
//! One connection with one confirm-enabled channel. The exchange is declared
//! durable on connect; messages are persistent and published `mandatory` so an
//! unroutable message comes back as a rejection instead of vanishing.

use crate::infra::config::Config;
use crate::io::broker::{BrokerChannel, BrokerConnector, ChannelError};
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CONTENT_TYPE: &str = "application/json";
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Where and how to publish
#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub url: String,
    pub exchange: String,
    pub exchange_type: String,
    pub routing_key: String,
}

impl AmqpConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.rabbitmq_url().to_string(),
            exchange: config.rabbitmq_exchange().to_string(),
            exchange_type: config.rabbitmq_exchange_type().to_string(),
            routing_key: config.rabbitmq_routing_key().to_string(),
        }
    }
}

fn exchange_kind(name: &str) -> ExchangeKind {
    match name.to_ascii_lowercase().as_str() {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "topic" => ExchangeKind::Topic,
        "headers" => ExchangeKind::Headers,
        _ => ExchangeKind::Custom(name.to_string()),
    }
}

/// Refusals by the broker or encoding failures are final; everything else is a link problem.
fn classify(e: lapin::Error) -> ChannelError {
    match e {
        lapin::Error::ProtocolError(_)
        | lapin::Error::SerialisationError(_)
        | lapin::Error::ParsingError(_) => ChannelError::Rejected(e.to_string()),
        _ => ChannelError::Transient(e.to_string()),
    }
}

fn classify_connect(e: lapin::Error) -> ChannelError {
    ChannelError::Transient(e.to_string())
}

pub struct AmqpConnector {
    config: AmqpConfig,
}

impl AmqpConnector {
    pub fn new(config: AmqpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, ChannelError> {
        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(classify_connect)?;

        let channel = connection.create_channel().await.map_err(classify_connect)?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(classify_connect)?;

        // A refused declaration closes the channel, so it counts as a link failure
        channel
            .exchange_declare(
                &self.config.exchange,
                exchange_kind(&self.config.exchange_type),
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(classify_connect)?;

        info!(
            exchange = %self.config.exchange,
            exchange_type = %self.config.exchange_type,
            routing_key = %self.config.routing_key,
            channel_id = %channel.id(),
            "amqp_connected"
        );

        Ok(Arc::new(AmqpChannel {
            connection,
            channel,
            exchange: self.config.exchange.clone(),
            routing_key: self.config.routing_key.clone(),
        }))
    }
}

pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    exchange: String,
    routing_key: String,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn publish(&self, payload: &[u8]) -> Result<(), ChannelError> {
        let message_id = Uuid::now_v7().to_string();
        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE.into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_message_id(message_id.clone().into())
            .with_timestamp(OffsetDateTime::now_utc().unix_timestamp().max(0) as u64);

        let confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions { mandatory: true, ..Default::default() },
                payload,
                properties,
            )
            .await
            .map_err(classify)?;

        match confirm.await.map_err(classify)? {
            Confirmation::Ack(None) => {
                debug!(message_id = %message_id, bytes = payload.len(), "amqp_publish_confirmed");
                Ok(())
            }
            Confirmation::Ack(Some(returned)) => {
                warn!(
                    message_id = %message_id,
                    reply_code = %returned.reply_code,
                    reply_text = %returned.reply_text.as_str(),
                    "amqp_message_returned"
                );
                Err(ChannelError::Rejected(format!(
                    "unroutable: {} {}",
                    returned.reply_code,
                    returned.reply_text.as_str()
                )))
            }
            Confirmation::Nack(_) => Err(ChannelError::Rejected("nacked by broker".to_string())),
            Confirmation::NotRequested => {
                Err(ChannelError::Transient("publisher confirms not active".to_string()))
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close(200, "closing").await {
            debug!(error = %e, "amqp_channel_close_failed");
        }
        if let Err(e) = self.connection.close(200, "closing").await {
            debug!(error = %e, "amqp_connection_close_failed");
        }
        info!("amqp_connection_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_kind() {
        assert!(matches!(exchange_kind("topic"), ExchangeKind::Topic));
        assert!(matches!(exchange_kind("Direct"), ExchangeKind::Direct));
        assert!(matches!(exchange_kind("fanout"), ExchangeKind::Fanout));
        assert!(matches!(exchange_kind("headers"), ExchangeKind::Headers));
        assert!(matches!(exchange_kind("x-delayed-message"), ExchangeKind::Custom(name) if name == "x-delayed-message"));
    }

    #[test]
    fn test_classify_io_error_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = classify(lapin::Error::IOError(Arc::new(io)));
        assert!(matches!(err, ChannelError::Transient(_)));
        assert!(matches!(classify(lapin::Error::MissingHeartbeatError), ChannelError::Transient(_)));
    }

    #[test]
    fn test_amqp_config_from_config() {
        let config = Config::default();
        let amqp = AmqpConfig::from_config(&config);
        assert_eq!(amqp.exchange, "its.events");
        assert_eq!(amqp.routing_key, "its.event");
    }
}
