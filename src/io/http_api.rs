//! HTTP front door
//!
//! Camera notifications, internal gate commands, health and Prometheus
//! metrics on one hyper HTTP/1.1 listener. Every request runs in an
//! `http_request` span carrying a fresh request id.

use crate::domain::event::ParseError;
use crate::infra::metrics::{HistogramSnapshot, Metrics, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::gate::{GateDispatcher, GateOutcome};
use crate::services::ingest::{IngestOutcome, IngestPipeline};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const MSG_EVENT_QUEUED: &str = "Event queued";
pub const MSG_EMPTY_BODY: &str = "Invalid or empty body";
pub const MSG_MALFORMED_EVENT: &str = "Malformed ITS event";
pub const MSG_QUEUE_FAILED: &str = "Failed to queue event";
pub const MSG_BODY_TOO_LARGE: &str = "Request body too large";
pub const MSG_MISSING_LANE: &str = "Missing lane ID";
pub const MSG_GATE_FAILED: &str = "Failed to open gate";
pub const MSG_NOT_FOUND: &str = "Not found";
pub const MSG_METHOD_NOT_ALLOWED: &str = "Method not allowed";

const GATE_PREFIX: &str = "/internal/gate/";
const GATE_SUFFIX: &str = "/open";

/// Shared by every connection
pub struct AppState {
    pub ingest: IngestPipeline,
    pub gate: GateDispatcher,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
    pub max_body_bytes: usize,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<'a> {
    #[serde(rename = "Result")]
    pub result: bool,
    #[serde(rename = "Message")]
    pub message: &'a str,
}

fn json_response(status: StatusCode, result: bool, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&ApiResponse { result, message })
        .unwrap_or_else(|_| br#"{"Result":false,"Message":""}"#.to_vec());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

enum Route<'a> {
    Event,
    Gate(&'a str),
    Health,
    Metrics,
}

impl<'a> Route<'a> {
    fn match_path(path: &'a str) -> Option<Self> {
        match path {
            "/" | "/notification/its-event" => Some(Route::Event),
            "/health" => Some(Route::Health),
            "/metrics" => Some(Route::Metrics),
            _ => {
                let lane = path.strip_prefix(GATE_PREFIX)?.strip_suffix(GATE_SUFFIX)?;
                if lane.contains('/') {
                    None
                } else {
                    Some(Route::Gate(lane))
                }
            }
        }
    }

    fn method(&self) -> Method {
        match self {
            Route::Event | Route::Gate(_) => Method::POST,
            Route::Health | Route::Metrics => Method::GET,
        }
    }
}

enum BodyError {
    TooLarge,
    Read(String),
}

async fn read_body(
    req: Request<hyper::body::Incoming>,
    limit: usize,
) -> Result<Bytes, BodyError> {
    match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(BodyError::TooLarge),
        Err(e) => Err(BodyError::Read(e.to_string())),
    }
}

async fn handle_event(
    req: Request<hyper::body::Incoming>,
    state: &AppState,
) -> Response<Full<Bytes>> {
    let raw = match read_body(req, state.max_body_bytes).await {
        Ok(raw) => raw,
        Err(BodyError::TooLarge) => {
            warn!(limit = %state.max_body_bytes, "its_event_body_too_large");
            return json_response(StatusCode::PAYLOAD_TOO_LARGE, false, MSG_BODY_TOO_LARGE);
        }
        Err(BodyError::Read(e)) => {
            warn!(error = %e, "its_event_body_read_failed");
            return json_response(StatusCode::BAD_REQUEST, false, MSG_EMPTY_BODY);
        }
    };

    match state.ingest.ingest(raw).await {
        IngestOutcome::Acked => json_response(StatusCode::OK, true, MSG_EVENT_QUEUED),
        IngestOutcome::BadRequest(ParseError::Empty) => {
            json_response(StatusCode::BAD_REQUEST, false, MSG_EMPTY_BODY)
        }
        IngestOutcome::BadRequest(_) => {
            json_response(StatusCode::BAD_REQUEST, false, MSG_MALFORMED_EVENT)
        }
        IngestOutcome::Failed(_) => {
            json_response(StatusCode::INTERNAL_SERVER_ERROR, false, MSG_QUEUE_FAILED)
        }
    }
}

async fn handle_gate(lane: &str, state: &AppState) -> Response<Full<Bytes>> {
    match state.gate.open(lane).await {
        GateOutcome::Opened(lane) => {
            json_response(StatusCode::OK, true, &format!("Barrier opened for lane {}", lane))
        }
        GateOutcome::MissingLane => json_response(StatusCode::BAD_REQUEST, false, MSG_MISSING_LANE),
        GateOutcome::Failed(_) => {
            json_response(StatusCode::INTERNAL_SERVER_ERROR, false, MSG_GATE_FAILED)
        }
    }
}

/// Route one request
pub async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    let path = req.uri().path().to_string();
    let Some(route) = Route::match_path(&path) else {
        return json_response(StatusCode::NOT_FOUND, false, MSG_NOT_FOUND);
    };
    if *req.method() != route.method() {
        return json_response(StatusCode::METHOD_NOT_ALLOWED, false, MSG_METHOD_NOT_ALLOWED);
    }

    match route {
        Route::Event => handle_event(req, &state).await,
        Route::Gate(lane) => handle_gate(lane, &state).await,
        Route::Health => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"),
        Route::Metrics => {
            let body = format_prometheus_metrics(&state.metrics, &state.site_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
    }
}

/// Accept connections until `shutdown` flips to true
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, site = %state.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                                let state = state.clone();
                                let span = info_span!(
                                    "http_request",
                                    request_id = %Uuid::now_v7(),
                                    method = %req.method(),
                                    path = %req.uri().path(),
                                );
                                async move {
                                    let response = handle_request(req, state).await;
                                    debug!(status = %response.status().as_u16(), "http_response");
                                    Ok::<_, Infallible>(response)
                                }
                                .instrument(span)
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!(peer = %peer, error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                // Sender gone counts as shutdown
                if changed.is_err() || *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_histogram(output: &mut String, name: &str, help: &str, site: &str, hist: &HistogramSnapshot) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += hist.buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += hist.buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", hist.sum_us);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {}", hist.count());
}

/// Metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_metric(
        &mut output,
        "its_gateway_uptime_seconds",
        "Seconds since start",
        MetricType::Gauge,
        site,
        summary.uptime_secs,
    );
    write_metric(
        &mut output,
        "its_gateway_events_received_total",
        "Event notifications received",
        MetricType::Counter,
        site,
        summary.events_received,
    );
    write_metric(
        &mut output,
        "its_gateway_events_queued_total",
        "Events confirmed by the broker",
        MetricType::Counter,
        site,
        summary.events_queued,
    );
    write_metric(
        &mut output,
        "its_gateway_events_bad_request_total",
        "Events rejected as empty or malformed",
        MetricType::Counter,
        site,
        summary.events_bad_request,
    );
    write_metric(
        &mut output,
        "its_gateway_events_failed_total",
        "Events the broker did not confirm",
        MetricType::Counter,
        site,
        summary.events_failed,
    );
    write_histogram(
        &mut output,
        "its_gateway_publish_latency_us",
        "Broker publish latency in microseconds",
        site,
        &summary.publish_latency,
    );

    write_metric(
        &mut output,
        "its_gateway_gate_opened_total",
        "Barrier open commands accepted by a controller",
        MetricType::Counter,
        site,
        summary.gate_opened,
    );
    write_metric(
        &mut output,
        "its_gateway_gate_failed_total",
        "Barrier open commands that failed at the controller",
        MetricType::Counter,
        site,
        summary.gate_failed,
    );
    write_metric(
        &mut output,
        "its_gateway_gate_unknown_lane_total",
        "Barrier open commands for unmapped lanes",
        MetricType::Counter,
        site,
        summary.gate_unknown_lane,
    );
    write_histogram(
        &mut output,
        "its_gateway_gate_latency_us",
        "Barrier command latency in microseconds",
        site,
        &summary.gate_latency,
    );

    output
}
