//! Broker publisher with bounded retry and reconnect
//!
//! One broker link per publisher, shared by every caller. The link is swapped
//! under an async mutex; publishes run concurrently over the shared channel.
//! A generation counter makes sure a caller holding a stale link can only tear
//! down that link, never a fresher one another caller already opened.

use crate::infra::config::Config;
use crate::io::broker::{BrokerChannel, BrokerConnector, ChannelError};
use backon::{BackoffBuilder, ConstantBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish deadline exceeded")]
    Timeout,
    #[error("broker rejected message: {0}")]
    Rejected(String),
    #[error("broker connection lost after {attempts} attempts: {last_error}")]
    ConnectionLost { attempts: u32, last_error: String },
    #[error("publisher is closed")]
    Closed,
}

/// Retry count and fixed delay between attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self { retries: config.rabbitmq_retry(), delay: config.rabbitmq_retry_delay() }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    fn delays(&self) -> impl Iterator<Item = Duration> {
        let backoff = ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.retries as usize)
            .build();
        std::iter::once(Duration::ZERO).chain(backoff)
    }
}

/// State of one `publish` call
#[derive(Debug, Default)]
struct PublishAttempt {
    attempt: u32,
    last_error: Option<String>,
}

struct Link {
    generation: u64,
    channel: Option<Arc<dyn BrokerChannel>>,
}

enum AcquireError {
    Closed,
    Channel(ChannelError),
}

pub struct Publisher {
    connector: Arc<dyn BrokerConnector>,
    policy: RetryPolicy,
    link: Mutex<Link>,
    closed: AtomicBool,
}

impl Publisher {
    pub fn new(connector: Arc<dyn BrokerConnector>, policy: RetryPolicy) -> Self {
        Self {
            connector,
            policy,
            link: Mutex::new(Link { generation: 0, channel: None }),
            closed: AtomicBool::new(false),
        }
    }

    /// Open the broker link now instead of on the first publish
    pub async fn connect(&self) -> Result<(), PublishError> {
        match self.acquire().await {
            Ok(_) => Ok(()),
            Err(AcquireError::Closed) => Err(PublishError::Closed),
            Err(AcquireError::Channel(ChannelError::Rejected(reason))) => {
                Err(PublishError::Rejected(reason))
            }
            Err(AcquireError::Channel(ChannelError::Transient(reason))) => {
                Err(PublishError::ConnectionLost { attempts: 1, last_error: reason })
            }
        }
    }

    /// Hand `payload` to the broker, retrying transient failures until `deadline`.
    ///
    /// Success means the broker confirmed the message.
    pub async fn publish(&self, payload: &[u8], deadline: Instant) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }
        if payload.is_empty() {
            return Err(PublishError::Rejected("empty payload".to_string()));
        }

        match timeout_at(deadline, self.publish_with_retry(payload, deadline)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(bytes = payload.len(), "broker_publish_deadline_exceeded");
                Err(PublishError::Timeout)
            }
        }
    }

    async fn publish_with_retry(&self, payload: &[u8], deadline: Instant) -> Result<(), PublishError> {
        let max_attempts = self.policy.max_attempts();
        let mut state = PublishAttempt::default();

        for delay in self.policy.delays() {
            if state.attempt > 0 {
                if Instant::now() + delay >= deadline {
                    warn!(
                        attempt = state.attempt,
                        delay_ms = delay.as_millis() as u64,
                        "broker_publish_retry_would_pass_deadline"
                    );
                    return Err(PublishError::Timeout);
                }
                tokio::time::sleep(delay).await;
            }
            state.attempt += 1;

            let (generation, channel) = match self.acquire().await {
                Ok(link) => link,
                Err(AcquireError::Closed) => return Err(PublishError::Closed),
                Err(AcquireError::Channel(e)) => {
                    warn!(
                        attempt = state.attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        "broker_connect_failed"
                    );
                    state.last_error = Some(e.to_string());
                    continue;
                }
            };

            match channel.publish(payload).await {
                Ok(()) => {
                    debug!(attempt = state.attempt, bytes = payload.len(), "broker_publish_ok");
                    return Ok(());
                }
                Err(ChannelError::Rejected(reason)) => {
                    warn!(attempt = state.attempt, reason = %reason, "broker_publish_rejected");
                    return Err(PublishError::Rejected(reason));
                }
                Err(e @ ChannelError::Transient(_)) => {
                    warn!(
                        attempt = state.attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        "broker_publish_failed"
                    );
                    self.invalidate(generation).await;
                    state.last_error = Some(e.to_string());
                }
            }
        }

        Err(PublishError::ConnectionLost {
            attempts: state.attempt,
            last_error: state.last_error.unwrap_or_else(|| "no attempt made".to_string()),
        })
    }

    /// Current link, connecting first if there is none
    async fn acquire(&self) -> Result<(u64, Arc<dyn BrokerChannel>), AcquireError> {
        let mut link = self.link.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(AcquireError::Closed);
        }
        if let Some(channel) = &link.channel {
            return Ok((link.generation, Arc::clone(channel)));
        }

        let channel = self.connector.connect().await.map_err(AcquireError::Channel)?;
        link.generation += 1;
        link.channel = Some(Arc::clone(&channel));
        info!(generation = link.generation, "broker_link_established");
        Ok((link.generation, channel))
    }

    /// Drop the link of `generation` if it is still the current one
    async fn invalidate(&self, generation: u64) {
        let stale = {
            let mut link = self.link.lock().await;
            if link.generation == generation {
                link.channel.take()
            } else {
                None
            }
        };

        if let Some(channel) = stale {
            info!(generation = generation, "broker_link_dropped");
            // Closing a dead link can block on I/O; keep it off the caller's deadline
            tokio::spawn(async move {
                channel.close().await;
            });
        }
    }

    /// Release the connection. Every later `publish` fails with `Closed`.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let channel = self.link.lock().await.channel.take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        info!("broker_publisher_closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
