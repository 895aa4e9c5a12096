//! The HTTP edge
//!
//! Translates requests into coordinator operations and serves the
//! non-mutating read paths directly off the shared state. Handlers are pure
//! producers: nothing here mutates the object table except by enqueueing an
//! operation.
//!
//! Error behavior is deliberately blunt: every failure (unknown key,
//! unknown path, malformed body, mutating verb on a read-only instance)
//! collapses to `404 Not found`, which is what deployed clients expect.

use crate::coordinator::CoordinatorHandle;
use crate::store::ObjectStore;
use crate::subscriber::Subscriber;
use crate::timeseries::{TimeseriesDb, TimeseriesEvent};
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

/// Header that may carry the object key instead of the `key` query parameter.
pub const KEY_HEADER: &str = "X-CVL-Object-Key";

/// Bodies must be strictly larger than 1024 bytes before gzip kicks in.
const COMPRESS_FLOOR: u16 = 1025;

/// Shared handler state.
#[derive(Clone)]
pub(crate) struct AppState {
    pub coordinator: CoordinatorHandle,
    pub store: Arc<RwLock<ObjectStore>>,
    pub timeseries: Arc<Vec<TimeseriesDb>>,
    pub read_only: bool,
}

/// The one and only error response this surface produces.
struct NotFound;

impl IntoResponse for NotFound {
    fn into_response(self) -> Response {
        (StatusCode::NOT_FOUND, "Not found").into_response()
    }
}

type HandlerResult<T> = std::result::Result<T, NotFound>;

/// Assemble the service router.
pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/object", get(get_object))
        .route("/list", get(get_list))
        .route("/events", get(get_events))
        .route("/ts", get(get_timeseries))
        .route("/info", get(get_info))
        .route("/trust", get(get_trust))
        .route("/publish", post(publish_metadata).put(publish_data))
        .route("/delete", post(delete_object))
        .route("/control", post(post_control))
        .route("/query", post(post_query))
        .route("/state", post(post_state))
        .fallback(fallback)
        .layer(
            CompressionLayer::new()
                .compress_when(SizeAbove::new(COMPRESS_FLOOR).and(NotForContentType::SSE)),
        )
        .layer(middleware::from_fn(permissive_cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Permissive CORS, answered the way browsers and deployed clients expect.
///
/// Any `OPTIONS` request, on any path, gets a `204` carrying
/// `Allow: OPTIONS, GET, POST` and the preflight allow headers so the
/// browser goes ahead with the real request. Every other response is stamped
/// with `Access-Control-Allow-Origin: *`.
async fn permissive_cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        headers.insert(header::ALLOW, HeaderValue::from_static("OPTIONS, GET, POST"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Origin, Content-Type, Accept"),
        );
        return response;
    }
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

async fn fallback() -> NotFound {
    NotFound
}

/// `GET /object?key=K[&meta|&data]`: metadata by default, bytes on `&data`.
async fn get_object(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> HandlerResult<Response> {
    let key = request_key(&params, &headers).ok_or(NotFound)?;
    let store = state.store.read().await;
    let object = store.get(&key).ok_or(NotFound)?;
    if params.contains_key("data") && !params.contains_key("meta") {
        let data = object.data().cloned().ok_or(NotFound)?;
        Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response())
    } else {
        Ok(Json(object.metadata().cloned()).into_response())
    }
}

/// `GET /list`: keys of every object that has metadata.
async fn get_list(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.store.read().await.keys_with_metadata())
}

/// `GET /events`: attach as an event-stream subscriber.
async fn get_events(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.coordinator.add_subscriber(Subscriber::new(addr, tx));
    let guard = DetachGuard {
        coordinator: state.coordinator.clone(),
        addr,
    };
    let stream = UnboundedReceiverStream::new(rx).map(move |frame| {
        let _held = &guard;
        Ok::<_, Infallible>(Event::default().data(frame))
    });
    Sse::new(stream)
}

/// Deregisters the subscriber when its SSE stream is dropped.
struct DetachGuard {
    coordinator: CoordinatorHandle,
    addr: SocketAddr,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.coordinator.remove_subscriber(self.addr);
    }
}

/// `GET /ts?t0=...&t1=...`: rows from every source in the window `(t0, t1]`.
async fn get_timeseries(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> HandlerResult<Json<Vec<TimeseriesEvent>>> {
    let t0 = window_bound(&params, "t0", "startts").ok_or(NotFound)?;
    let t1 = window_bound(&params, "t1", "endts").ok_or(NotFound)?;
    let sources = Arc::clone(&state.timeseries);
    let events = tokio::task::spawn_blocking(move || -> cvl_core::Result<Vec<TimeseriesEvent>> {
        let mut events = Vec::new();
        for db in sources.iter() {
            events.extend(db.range(t0, t1)?);
        }
        Ok(events)
    })
    .await
    .map_err(|_| NotFound)?
    .map_err(|err| {
        tracing::warn!(error = %err, "timeseries query failed");
        NotFound
    })?;
    Ok(Json(events))
}

fn window_bound(params: &HashMap<String, String>, name: &str, alias: &str) -> Option<f64> {
    params
        .get(name)
        .or_else(|| params.get(alias))?
        .parse()
        .ok()
}

/// `GET /info`: properties of every timeseries source, tagged with its name.
async fn get_info(State(state): State<AppState>) -> HandlerResult<Json<Vec<Value>>> {
    let sources = Arc::clone(&state.timeseries);
    let documents = tokio::task::spawn_blocking(move || -> cvl_core::Result<Vec<Value>> {
        let mut documents = Vec::new();
        for db in sources.iter() {
            let mut doc = db.properties()?;
            if let Value::Object(map) = &mut doc {
                map.insert("db".to_string(), Value::String(db.name().to_string()));
            }
            documents.push(doc);
        }
        Ok(documents)
    })
    .await
    .map_err(|_| NotFound)?
    .map_err(|err| {
        tracing::warn!(error = %err, "timeseries info failed");
        NotFound
    })?;
    Ok(Json(documents))
}

/// `GET /trust`: landing page for accepting a self-signed certificate.
async fn get_trust() -> &'static str {
    "Congratulations, you have successfully trusted the server's self-signed certificate! \
     You may now close this tab."
}

/// `POST /publish`: JSON metadata for `key`.
async fn publish_metadata(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult<Json<Value>> {
    let key = writable_key(&state, &params, &headers)?;
    let metadata: Value = serde_json::from_slice(&body).map_err(|_| NotFound)?;
    tracing::debug!(key = %key, "publish metadata");
    state.coordinator.update(key, Some(metadata), None);
    Ok(success())
}

/// `PUT /publish`: raw bytes for `key`. An empty body is rejected.
async fn publish_data(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult<Json<Value>> {
    let key = writable_key(&state, &params, &headers)?;
    if body.is_empty() {
        return Err(NotFound);
    }
    tracing::debug!(key = %key, bytes = body.len(), "publish data");
    state.coordinator.update(key, None, Some(body));
    Ok(success())
}

/// `POST /delete`: remove the object at `key`.
async fn delete_object(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> HandlerResult<Json<Value>> {
    let key = writable_key(&state, &params, &headers)?;
    state.coordinator.update(key, None, None);
    Ok(success())
}

/// `POST /control`: broadcast an arbitrary document to all subscribers.
async fn post_control(State(state): State<AppState>, body: Bytes) -> HandlerResult<Json<Value>> {
    if state.read_only {
        return Err(NotFound);
    }
    let meta: Value = serde_json::from_slice(&body).map_err(|_| NotFound)?;
    state.coordinator.control(meta);
    Ok(success())
}

/// `POST /query`: ask every subscriber to report state and block for replies.
async fn post_query(State(state): State<AppState>) -> HandlerResult<Json<Vec<Value>>> {
    if state.read_only {
        return Err(NotFound);
    }
    let query = state.coordinator.start_query();
    Ok(Json(query.wait().await))
}

/// `POST /state`: a subscriber's answer to an outstanding query.
async fn post_state(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> HandlerResult<Json<Value>> {
    if state.read_only {
        return Err(NotFound);
    }
    let payload: Value = serde_json::from_slice(&body).map_err(|_| NotFound)?;
    state.coordinator.msg(addr, payload);
    Ok(success())
}

fn success() -> Json<Value> {
    Json(json!({"success": true}))
}

fn request_key(params: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(key) = params.get("key") {
        return Some(key.clone());
    }
    headers
        .get(KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Key lookup for mutating paths, which are all refused in read-only mode.
fn writable_key(
    state: &AppState,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
) -> HandlerResult<String> {
    if state.read_only {
        return Err(NotFound);
    }
    request_key(params, headers).ok_or(NotFound)
}
