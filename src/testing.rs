//! In-process fakes shared by the unit tests: a Pub/Sub emulator speaking the
//! REST surface the relay uses, and a spy function endpoint.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::{Json, serve};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::pubsub::message::{
    AcknowledgeRequest, PublishRequest, PubsubMessage, PullRequest, PulledMessage,
    SubscriptionRequest,
};

#[derive(Default)]
struct EmulatorState {
    topics: HashSet<String>,
    /// subscription -> topic
    subscriptions: HashMap<String, String>,
    backlog: HashMap<String, VecDeque<PubsubMessage>>,
    /// ack id -> (subscription, message)
    leased: HashMap<String, (String, PubsubMessage)>,
    acked: Vec<String>,
    pulls: usize,
    next_id: u64,
}

impl EmulatorState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

type Shared = Arc<Mutex<EmulatorState>>;

/// Fake Pub/Sub emulator. Leased messages only come back after
/// [`FakeEmulator::expire_leases`], which stands in for the ack deadline.
pub struct FakeEmulator {
    addr: SocketAddr,
    state: Shared,
}

impl FakeEmulator {
    pub async fn start() -> Self {
        let state: Shared = Arc::default();
        let app = Router::new()
            .route(
                "/v1/projects/{project}/topics/{topic}",
                put(create_topic).post(topic_action),
            )
            .route(
                "/v1/projects/{project}/subscriptions/{subscription}",
                put(create_subscription).post(subscription_action),
            )
            .with_state(state.clone());

        let addr = spawn_server(app).await;
        Self { addr, state }
    }

    /// `host:port`, as `PUBSUB_EMULATOR_HOST` would carry it.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn has_subscription(&self, subscription: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .contains_key(subscription)
    }

    /// Message ids acknowledged so far, in ack order.
    pub fn acked(&self) -> Vec<String> {
        self.state.lock().unwrap().acked.clone()
    }

    pub fn leased(&self) -> usize {
        self.state.lock().unwrap().leased.len()
    }

    pub fn backlog(&self, subscription: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .backlog
            .get(subscription)
            .map_or(0, VecDeque::len)
    }

    pub fn pulls(&self) -> usize {
        self.state.lock().unwrap().pulls
    }

    /// Returns every leased message to its subscription's backlog.
    pub fn expire_leases(&self) {
        let mut state = self.state.lock().unwrap();
        let leased: Vec<_> = state.leased.drain().map(|(_, v)| v).collect();
        for (subscription, message) in leased {
            state
                .backlog
                .entry(subscription)
                .or_default()
                .push_back(message);
        }
    }

    /// Queues a message whose `data` is taken verbatim, bypassing base64.
    pub fn push_raw(&self, subscription: &str, data: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state
            .backlog
            .entry(subscription.to_string())
            .or_default()
            .push_back(PubsubMessage {
                data: data.to_string(),
                attributes: HashMap::new(),
                message_id: id.to_string(),
                publish_time: Some(Utc::now()),
            });
    }
}

fn status_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "code": status.as_u16(), "message": message } })),
    )
        .into_response()
}

async fn create_topic(
    State(state): State<Shared>,
    Path((project, topic)): Path<(String, String)>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !state.topics.insert(topic.clone()) {
        return status_error(StatusCode::CONFLICT, "Topic already exists");
    }
    Json(json!({ "name": format!("projects/{project}/topics/{topic}") })).into_response()
}

async fn topic_action(
    State(state): State<Shared>,
    Path((_project, action)): Path<(String, String)>,
    Json(request): Json<PublishRequest>,
) -> Response {
    let Some((topic, "publish")) = action.split_once(':') else {
        return status_error(StatusCode::NOT_FOUND, "unknown topic action");
    };

    let mut state = state.lock().unwrap();
    if !state.topics.contains(topic) {
        return status_error(StatusCode::NOT_FOUND, "Topic not found");
    }

    let subscriptions: Vec<String> = state
        .subscriptions
        .iter()
        .filter(|(_, t)| t.as_str() == topic)
        .map(|(s, _)| s.clone())
        .collect();

    let mut ids = Vec::new();
    for mut message in request.messages {
        let id = state.next_id().to_string();
        message.message_id = id.clone();
        message.publish_time = Some(Utc::now());
        for subscription in &subscriptions {
            state
                .backlog
                .entry(subscription.clone())
                .or_default()
                .push_back(message.clone());
        }
        ids.push(id);
    }

    Json(json!({ "messageIds": ids })).into_response()
}

async fn create_subscription(
    State(state): State<Shared>,
    Path((project, subscription)): Path<(String, String)>,
    Json(request): Json<SubscriptionRequest>,
) -> Response {
    let topic = request.topic.rsplit('/').next().unwrap_or_default().to_string();

    let mut state = state.lock().unwrap();
    if !state.topics.contains(&topic) {
        return status_error(StatusCode::NOT_FOUND, "Topic not found");
    }
    if state.subscriptions.contains_key(&subscription) {
        return status_error(StatusCode::CONFLICT, "Subscription already exists");
    }
    state.subscriptions.insert(subscription.clone(), topic);
    Json(json!({
        "name": format!("projects/{project}/subscriptions/{subscription}"),
        "topic": request.topic,
        "ackDeadlineSeconds": request.ack_deadline_seconds,
    }))
    .into_response()
}

async fn subscription_action(
    State(state): State<Shared>,
    Path((_project, action)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let Some((subscription, verb)) = action.split_once(':') else {
        return status_error(StatusCode::NOT_FOUND, "unknown subscription action");
    };

    let mut state = state.lock().unwrap();
    if !state.subscriptions.contains_key(subscription) {
        return status_error(StatusCode::NOT_FOUND, "Subscription does not exist");
    }

    match verb {
        "pull" => {
            let request: PullRequest = serde_json::from_value(body).unwrap();
            state.pulls += 1;
            let mut received = Vec::new();
            for _ in 0..request.max_messages {
                let Some(message) = state
                    .backlog
                    .get_mut(subscription)
                    .and_then(VecDeque::pop_front)
                else {
                    break;
                };
                let ack_id = format!("ack-{}", state.next_id());
                state
                    .leased
                    .insert(ack_id.clone(), (subscription.to_string(), message.clone()));
                received.push(PulledMessage { ack_id, message });
            }
            if received.is_empty() {
                Json(json!({})).into_response()
            } else {
                Json(json!({ "receivedMessages": received })).into_response()
            }
        }
        "acknowledge" => {
            let request: AcknowledgeRequest = serde_json::from_value(body).unwrap();
            for ack_id in request.ack_ids {
                if let Some((_, message)) = state.leased.remove(&ack_id) {
                    state.acked.push(message.message_id);
                }
            }
            Json(json!({})).into_response()
        }
        _ => status_error(StatusCode::NOT_FOUND, "unknown subscription action"),
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub content_type: Option<String>,
    pub body: Value,
}

struct SpyState {
    requests: Mutex<Vec<RecordedRequest>>,
    status: AtomicU16,
    /// paths of GET requests, in arrival order
    probes: Mutex<Vec<String>>,
    /// per-path wait before answering
    delays: Mutex<HashMap<String, Duration>>,
}

/// Stand-in for a locally running function. Records every POST and answers
/// with the configured status; GET requests count as probes. Any path can
/// be made slow with [`SpyEndpoint::set_delay`].
pub struct SpyEndpoint {
    addr: SocketAddr,
    state: Arc<SpyState>,
}

impl SpyEndpoint {
    pub async fn start(status: StatusCode) -> Self {
        let state = Arc::new(SpyState {
            requests: Mutex::new(Vec::new()),
            status: AtomicU16::new(status.as_u16()),
            probes: Mutex::new(Vec::new()),
            delays: Mutex::new(HashMap::new()),
        });
        let app = Router::new().fallback(spy).with_state(state.clone());
        let addr = spawn_server(app).await;
        Self { addr, state }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn set_status(&self, status: StatusCode) {
        self.state.status.store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn probes(&self) -> usize {
        self.state.probes.lock().unwrap().len()
    }

    pub fn get_paths(&self) -> Vec<String> {
        self.state.probes.lock().unwrap().clone()
    }

    /// Makes every request to `path` wait `delay` before it is answered.
    pub fn set_delay(&self, path: &str, delay: Duration) {
        self.state
            .delays
            .lock()
            .unwrap()
            .insert(path.to_string(), delay);
    }

    /// Waits until at least `calls` POSTs arrived. Returns false on timeout.
    pub async fn wait_for_calls(&self, calls: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.calls() >= calls {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.calls() >= calls
    }
}

async fn spy(
    State(state): State<Arc<SpyState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delay = state.delays.lock().unwrap().get(uri.path()).copied();

    if method == Method::GET {
        state.probes.lock().unwrap().push(uri.path().to_string());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        return StatusCode::OK.into_response();
    }

    // decided before recording, so a test that saw the call can no longer change it
    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state.requests.lock().unwrap().push(RecordedRequest {
        path: uri.path().to_string(),
        content_type,
        body,
    });
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    (status, "ok").into_response()
}

async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = serve(listener, app).await;
    });
    addr
}

/// A local port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
