//! In-process test doubles served with axum on ephemeral ports.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{get, post};
use axum::Json;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server failed");
    });
    addr
}

#[derive(Debug, Default)]
struct CoordinatorState {
    pending: Vec<Value>,
    claimed: HashMap<String, Value>,
    polls: Vec<Value>,
    reports: Vec<(String, Value)>,
    uploads: Vec<(String, String, Vec<u8>)>,
    authorization: Vec<String>,
}

type Shared = Arc<Mutex<CoordinatorState>>;

/// Fake coordination service speaking the `{"data": ...}` envelope.
#[derive(Clone)]
pub struct FakeCoordinator {
    addr: SocketAddr,
    state: Shared,
}

impl FakeCoordinator {
    pub async fn spawn() -> Self {
        let state = Shared::default();
        let app = Router::new()
            .route("/v1", get(|| async { Json(json!({ "status": "ok" })) }))
            .route("/v1/poll", post(poll))
            .route("/v1/interception/{id}", post(update))
            .route("/v1/interception/{id}/body", post(upload))
            .with_state(state.clone());
        let addr = serve(app).await;
        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Queue an interception for the next poll.
    pub fn enqueue(&self, interception: Value) {
        self.state.lock().unwrap().pending.push(interception);
    }

    pub fn polls(&self) -> Vec<Value> {
        self.state.lock().unwrap().polls.clone()
    }

    pub fn reports(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().reports.clone()
    }

    /// `(id, content type, raw payload)` per body upload.
    pub fn uploads(&self) -> Vec<(String, String, Vec<u8>)> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn authorization_headers(&self) -> Vec<String> {
        self.state.lock().unwrap().authorization.clone()
    }
}

fn record_auth(state: &Shared, headers: &HeaderMap) {
    let value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.lock().unwrap().authorization.push(value);
}

async fn poll(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    record_auth(&state, &headers);
    let mut guard = state.lock().unwrap();
    guard.polls.push(body);
    let items: Vec<Value> = std::mem::take(&mut guard.pending);
    for item in &items {
        if let Some(id) = item["interception"].as_str() {
            guard.claimed.insert(id.to_string(), item.clone());
        }
    }
    Json(json!({ "data": { "interceptions": items } }))
}

async fn update(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    record_auth(&state, &headers);
    let mut guard = state.lock().unwrap();
    if body["status"] == "accept" {
        return match guard.claimed.get(&id) {
            Some(item) => (
                StatusCode::OK,
                Json(json!({ "data": { "interception": item } })),
            ),
            None => (StatusCode::CONFLICT, Json(json!({ "error": "already claimed" }))),
        };
    }
    guard.reports.push((id, body));
    (StatusCode::OK, Json(json!({ "data": {} })))
}

async fn upload(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    record_auth(&state, &headers);
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state
        .lock()
        .unwrap()
        .uploads
        .push((id, content_type, body.to_vec()));
    StatusCode::OK
}

/// A request seen by the [`LocalTarget`].
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    /// Path and query exactly as received.
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Local server standing in for the developer's application. Answers every
/// request with the configured status and body.
#[derive(Clone)]
pub struct LocalTarget {
    pub port: u16,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl LocalTarget {
    pub async fn spawn(status: u16, body: &'static str) -> Self {
        let seen: Arc<Mutex<Vec<SeenRequest>>> = Arc::default();
        let recorder = seen.clone();
        let app = Router::new().fallback(
            move |method: Method, OriginalUri(uri): OriginalUri, headers: HeaderMap, payload: Bytes| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().unwrap().push(SeenRequest {
                        method: method.to_string(),
                        uri: uri
                            .path_and_query()
                            .map(|pq| pq.as_str().to_string())
                            .unwrap_or_default(),
                        headers,
                        body: payload.to_vec(),
                    });
                    (
                        StatusCode::from_u16(status).unwrap(),
                        [("x-target", "local")],
                        body,
                    )
                }
            },
        );
        let addr = serve(app).await;
        Self {
            port: addr.port(),
            seen,
        }
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}
