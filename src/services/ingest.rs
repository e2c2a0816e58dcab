//! Event ingestion: parse, publish the raw bytes, report the outcome

use crate::domain::event::{Event, ParseError};
use crate::infra::metrics::Metrics;
use crate::io::publisher::{PublishError, Publisher};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug)]
pub enum IngestOutcome {
    /// Broker confirmed the event
    Acked,
    BadRequest(ParseError),
    Failed(PublishError),
}

pub struct IngestPipeline {
    publisher: Arc<Publisher>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl IngestPipeline {
    pub fn new(publisher: Arc<Publisher>, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self { publisher, timeout, metrics }
    }

    pub async fn ingest(&self, raw: Bytes) -> IngestOutcome {
        self.metrics.record_event_received();

        let event = match Event::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_event_bad_request();
                warn!(error = %e, "its_event_rejected");
                return IngestOutcome::BadRequest(e);
            }
        };

        info!(
            plate = %event.plate_number,
            allow_user = %event.allow_user,
            pictures = %event.pictures.len(),
            source = %event.source(),
            bytes = %event.raw_payload().len(),
            "its_event_received"
        );

        let start = StdInstant::now();
        let deadline = Instant::now() + self.timeout;
        let result = self.publisher.publish(event.raw_payload(), deadline).await;
        let latency_us = start.elapsed().as_micros() as u64;

        match result {
            Ok(()) => {
                self.metrics.record_event_queued(latency_us);
                info!(plate = %event.plate_number, latency_us = %latency_us, "its_event_queued");
                IngestOutcome::Acked
            }
            Err(e) => {
                self.metrics.record_event_failed(latency_us);
                warn!(
                    plate = %event.plate_number,
                    latency_us = %latency_us,
                    error = %e,
                    "its_event_publish_failed"
                );
                IngestOutcome::Failed(e)
            }
        }
    }
}
