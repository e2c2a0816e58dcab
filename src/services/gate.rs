//! Lane barrier actuation

use crate::infra::metrics::Metrics;
use crate::io::dahua::{BarrierActuator, GateError};
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug)]
pub enum GateOutcome {
    Opened(String),
    MissingLane,
    Failed(GateError),
}

pub struct GateDispatcher {
    actuator: Arc<dyn BarrierActuator>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl GateDispatcher {
    pub fn new(actuator: Arc<dyn BarrierActuator>, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self { actuator, timeout, metrics }
    }

    /// Open the barrier of `lane`. One command, no retry.
    pub async fn open(&self, lane: &str) -> GateOutcome {
        let lane = lane.trim();
        if lane.is_empty() {
            warn!("gate_open_missing_lane");
            return GateOutcome::MissingLane;
        }

        let start = StdInstant::now();
        let deadline = Instant::now() + self.timeout;
        let result = self.actuator.open_barrier(lane, deadline).await;
        let latency_us = start.elapsed().as_micros() as u64;

        match result {
            Ok(()) => {
                self.metrics.record_gate_opened(latency_us);
                info!(lane = %lane, latency_us = %latency_us, "gate_opened");
                GateOutcome::Opened(lane.to_string())
            }
            Err(e) => {
                if matches!(e, GateError::UnknownLane(_)) {
                    self.metrics.record_gate_unknown_lane();
                } else {
                    self.metrics.record_gate_failed(latency_us);
                }
                warn!(lane = %lane, latency_us = %latency_us, error = %e, "gate_open_failed");
                GateOutcome::Failed(e)
            }
        }
    }
}
