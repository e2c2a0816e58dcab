//! Dahua access-controller client
//!
//! Opens a lane barrier with the `openDoor` CGI command. The controller guards
//! the CGI with digest auth, so one command is two round trips: an unauthenticated
//! GET that earns a challenge, then the same GET with the computed `Authorization`.
//! Both trips share the caller's deadline.

use crate::domain::lane::{Controller, LaneMap};
use crate::io::digest::{new_cnonce, DigestChallenge};
use async_trait::async_trait;
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Instant as StdInstant;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

pub const OPEN_DOOR_PATH: &str = "/cgi-bin/accessControl.cgi?action=openDoor&channel=1&UserID=101";

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("controller answered with status {0}")]
    Status(u16),
    #[error("controller unreachable: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("controller did not answer before the deadline")]
    Timeout,
    #[error("unusable auth challenge: {0}")]
    Challenge(String),
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("no controller configured for lane {0}")]
    UnknownLane(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Something that can lift a lane barrier
#[async_trait]
pub trait BarrierActuator: Send + Sync {
    async fn open_barrier(&self, lane: &str, deadline: Instant) -> Result<(), GateError>;
}

pub fn command_url(address: &str) -> String {
    format!("http://{}{}", address.trim().trim_end_matches('/'), OPEN_DOOR_PATH)
}

fn transport(e: reqwest::Error) -> DeviceError {
    if e.is_timeout() {
        DeviceError::Timeout
    } else {
        DeviceError::Transport(e)
    }
}

pub struct DahuaClient {
    lanes: Arc<LaneMap>,
    http: reqwest::Client,
}

impl DahuaClient {
    pub fn new(lanes: Arc<LaneMap>) -> Result<Self, reqwest::Error> {
        // One self-contained exchange per command, no idle connections kept
        let http = reqwest::Client::builder().http1_only().pool_max_idle_per_host(0).build()?;
        Ok(Self { lanes, http })
    }

    async fn open_door(&self, controller: &Controller) -> Result<(), DeviceError> {
        let url = command_url(&controller.address);

        let first = self
            .http
            .get(&url)
            .header("Accept", "*/*")
            .send()
            .await
            .map_err(transport)?;

        let status = first.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        if status != StatusCode::UNAUTHORIZED {
            return Err(DeviceError::Status(status.as_u16()));
        }

        let challenge = first
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| match DigestChallenge::parse(v) {
                Ok(challenge) => Some(challenge),
                Err(e) => {
                    debug!(header = %v, error = %e, "gate_challenge_skipped");
                    None
                }
            })
            .ok_or_else(|| DeviceError::Challenge("401 without a usable Digest challenge".to_string()))?;
        drop(first);

        let authorization = challenge.authorization(
            &controller.credentials,
            "GET",
            OPEN_DOOR_PATH,
            1,
            &new_cnonce(),
        );

        let second = self
            .http
            .get(&url)
            .header("Accept", "*/*")
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(transport)?;

        match second.status() {
            StatusCode::OK => Ok(()),
            other => Err(DeviceError::Status(other.as_u16())),
        }
    }
}

#[async_trait]
impl BarrierActuator for DahuaClient {
    async fn open_barrier(&self, lane: &str, deadline: Instant) -> Result<(), GateError> {
        let Some(controller) = self.lanes.resolve(lane) else {
            warn!(lane = %lane, "gate_lane_not_configured");
            return Err(GateError::UnknownLane(lane.to_string()));
        };

        let start = StdInstant::now();
        debug!(lane = %lane, address = %controller.address, "gate_open_command_sent");

        let result = match timeout_at(deadline, self.open_door(controller)).await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout),
        };
        let latency_us = start.elapsed().as_micros() as u64;

        match result {
            Ok(()) => {
                info!(
                    lane = %lane,
                    address = %controller.address,
                    latency_us = %latency_us,
                    "gate_open_command"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    lane = %lane,
                    address = %controller.address,
                    latency_us = %latency_us,
                    error = %e,
                    "gate_open_command_error"
                );
                Err(e.into())
            }
        }
    }
}
