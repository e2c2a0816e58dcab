//! Shared test fixtures: an in-memory broker and a digest-protected mock controller

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use its_gateway::domain::lane::{Controller, Credentials};
use its_gateway::io::broker::{BrokerChannel, BrokerConnector, ChannelError};
use its_gateway::io::digest::{parse_params, Algorithm, DigestChallenge};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

// ============================================================================
// Stub broker
// ============================================================================

/// In-memory broker with failure injection
#[derive(Default)]
pub struct StubBroker {
    received: Mutex<Vec<Vec<u8>>>,
    connects: AtomicU32,
    publishes: AtomicU32,
    closes: AtomicU32,
    fail_connects: AtomicU32,
    fail_publishes: AtomicU32,
    reject: AtomicBool,
    publish_delay_ms: AtomicU64,
}

fn take_one(counter: &AtomicU32) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

impl StubBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn BrokerConnector> {
        Arc::new(StubConnector { broker: Arc::clone(self) })
    }

    /// The next `n` connect attempts fail transiently
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// The next `n` publishes fail transiently (link dropped)
    pub fn fail_next_publishes(&self, n: u32) {
        self.fail_publishes.store(n, Ordering::SeqCst);
    }

    pub fn reject_all(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Simulated broker round trip
    pub fn set_publish_delay(&self, delay: Duration) {
        self.publish_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn publishes(&self) -> u32 {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

struct StubConnector {
    broker: Arc<StubBroker>,
}

#[async_trait]
impl BrokerConnector for StubConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, ChannelError> {
        self.broker.connects.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.broker.fail_connects) {
            return Err(ChannelError::Transient("connection refused".to_string()));
        }
        Ok(Arc::new(StubChannel { broker: Arc::clone(&self.broker) }))
    }
}

struct StubChannel {
    broker: Arc<StubBroker>,
}

#[async_trait]
impl BrokerChannel for StubChannel {
    async fn publish(&self, payload: &[u8]) -> Result<(), ChannelError> {
        self.broker.publishes.fetch_add(1, Ordering::SeqCst);

        let delay_ms = self.broker.publish_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if take_one(&self.broker.fail_publishes) {
            return Err(ChannelError::Transient("channel closed".to_string()));
        }
        if self.broker.reject.load(Ordering::SeqCst) {
            return Err(ChannelError::Rejected("nacked by broker".to_string()));
        }

        self.broker.received.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    async fn close(&self) {
        self.broker.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock Dahua controller
// ============================================================================

pub const MOCK_REALM: &str = "Login to MOCK0001";
pub const MOCK_NONCE: &str = "1811923456";
pub const MOCK_OPAQUE: &str = "4b0ba7e9a8a5d4d2";
const OPEN_DOOR_QUERY: &str = "action=openDoor&channel=1&UserID=101";

/// How the mock controller answers an authenticated openDoor
#[derive(Debug, Clone)]
pub struct ControllerBehavior {
    pub credentials: Credentials,
    /// Status for a correctly authenticated request
    pub status: u16,
    /// Delay before every answer
    pub delay: Duration,
    /// Answer every openDoor with `status`, no auth required
    pub no_auth: bool,
    /// Replaces the Digest `WWW-Authenticate` value of the 401
    pub challenge_header: Option<String>,
}

impl Default for ControllerBehavior {
    fn default() -> Self {
        Self {
            credentials: Credentials::new("admin", "admin123"),
            status: 200,
            delay: Duration::ZERO,
            no_auth: false,
            challenge_header: None,
        }
    }
}

pub struct MockController {
    pub addr: SocketAddr,
    requests: Arc<AtomicU32>,
    authorized: Arc<AtomicU32>,
}

impl MockController {
    pub async fn start(behavior: ControllerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicU32::new(0));
        let authorized = Arc::new(AtomicU32::new(0));
        let behavior = Arc::new(behavior);

        let (req_count, auth_count) = (requests.clone(), authorized.clone());
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let behavior = behavior.clone();
                let req_count = req_count.clone();
                let auth_count = auth_count.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let behavior = behavior.clone();
                        let req_count = req_count.clone();
                        let auth_count = auth_count.clone();
                        async move {
                            req_count.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, Infallible>(answer(req, &behavior, &auth_count).await)
                        }
                    });
                    let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
                });
            }
        });

        Self { addr, requests, authorized }
    }

    /// Controller entry pointing at this mock
    pub fn controller(&self, credentials: Credentials) -> Controller {
        Controller { address: self.addr.to_string(), credentials }
    }

    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Requests that carried a valid digest response
    pub fn authorized(&self) -> u32 {
        self.authorized.load(Ordering::SeqCst)
    }
}

fn challenge() -> DigestChallenge {
    DigestChallenge {
        realm: MOCK_REALM.to_string(),
        nonce: MOCK_NONCE.to_string(),
        opaque: Some(MOCK_OPAQUE.to_string()),
        algorithm: Algorithm::Md5,
        qop_auth: true,
    }
}

fn respond(status: u16, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn unauthorized(challenge_header: Option<&str>) -> Response<Full<Bytes>> {
    let header = match challenge_header {
        Some(header) => header.to_string(),
        None => format!(
            r#"Digest realm="{}", qop="auth", nonce="{}", opaque="{}""#,
            MOCK_REALM, MOCK_NONCE, MOCK_OPAQUE
        ),
    };
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header("WWW-Authenticate", header)
        .body(Full::new(Bytes::from("Unauthorized")))
        .unwrap()
}

fn is_valid_authorization(header: &str, credentials: &Credentials) -> bool {
    let Some(params) = header.strip_prefix("Digest ").map(parse_params) else {
        return false;
    };
    let field = |name: &str| params.get(name).map(String::as_str).unwrap_or_default();

    if field("username") != credentials.username
        || field("realm") != MOCK_REALM
        || field("nonce") != MOCK_NONCE
        || field("opaque") != MOCK_OPAQUE
        || field("qop") != "auth"
    {
        return false;
    }

    let expected =
        challenge().response(credentials, "GET", field("uri"), field("nc"), field("cnonce"));
    field("response") == expected
}

async fn answer(
    req: Request<hyper::body::Incoming>,
    behavior: &ControllerBehavior,
    authorized: &AtomicU32,
) -> Response<Full<Bytes>> {
    if !behavior.delay.is_zero() {
        tokio::time::sleep(behavior.delay).await;
    }

    if req.uri().path() != "/cgi-bin/accessControl.cgi" || req.uri().query() != Some(OPEN_DOOR_QUERY) {
        return respond(404, "Not Found");
    }

    if behavior.no_auth {
        return respond(behavior.status, if behavior.status == 200 { "OK" } else { "Error" });
    }

    let valid = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| is_valid_authorization(v, &behavior.credentials))
        .unwrap_or(false);

    if !valid {
        return unauthorized(behavior.challenge_header.as_deref());
    }

    authorized.fetch_add(1, Ordering::SeqCst);
    respond(behavior.status, if behavior.status == 200 { "OK" } else { "Error" })
}

/// An address nothing listens on
pub async fn closed_port_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}
