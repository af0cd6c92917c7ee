//! HTTP handlers for the relay operations.
//!
//! | Method | Path                 | Operation                      |
//! |--------|----------------------|--------------------------------|
//! | GET    | `/`                  | create, stream notifications   |
//! | GET    | `/{conversation}`    | join, stream notifications     |
//! | GET    | `/{conversation}/{m}`| read a message once            |
//! | PUT    | `/{conversation}`    | store a message                |
//! | GET    | `/health`            | liveness and counters          |
//! | GET    | `/metrics`           | Prometheus text                |
//!
//! Unknown ids and foreign origins are answered with an empty `200`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, Path, State};
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use tete_core::{ConversationId, MessageId, RelayError, Severity};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::health::{self, HealthResponse};
use crate::metrics::RELAY_ERRORS_TOTAL;
use crate::relay::{Departure, EventStream};
use crate::server::AppState;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const RETRY_AFTER_SECS: &str = "1";

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_message_size;
    Router::new()
        .route("/", get(create))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/{conversation}", get(join).put(write))
        .route("/{conversation}/{message}", get(read))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────────

/// [`RelayError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// Status code for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RelayError::ConversationNotFound(_)
            | RelayError::MessageNotFound { .. }
            | RelayError::Unauthorized { .. } => StatusCode::OK,
            RelayError::IdCollision { .. } | RelayError::Clock => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::StructuralInvariantViolation { .. } => StatusCode::CONFLICT,
            RelayError::EmptyConversation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let err = self.0;
        if err.is_silent() {
            debug!(error = %err, "silent no-op");
            return status.into_response();
        }
        match err.severity() {
            Severity::Bug => error!(error = %err, code = err.code(), "relay invariant broken"),
            Severity::Transient => warn!(error = %err, code = err.code(), "transient failure"),
            Severity::Expected => debug!(error = %err, code = err.code(), "request rejected"),
        }
        counter!(RELAY_ERRORS_TOTAL, "code" => err.code()).increment(1);
        let body = format!("{}\n", err.code());
        if err.is_retryable() {
            return (status, [(header::RETRY_AFTER, RETRY_AFTER_SECS)], body).into_response();
        }
        (status, body).into_response()
    }
}

// ── Extractors ──────────────────────────────────────────────────────────────

/// Network origin of the requesting client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOrigin(pub String);

impl FromRequestParts<AppState> for ClientOrigin {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(resolve_origin(
            &parts.headers,
            peer,
            state.config.trust_forwarded_for,
        )))
    }
}

/// Origin of a request: the peer IP, or the first forwarded hop when trusted.
pub fn resolve_origin(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(origin) = forwarded {
            return origin.to_owned();
        }
    }
    peer.map_or_else(|| "unknown".to_owned(), |addr| addr.ip().to_string())
}

/// Whether the `User-Agent` marks a relay client rather than a browser.
pub fn is_relay_client(headers: &HeaderMap, prefixes: &[String]) -> bool {
    let Some(agent) = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    prefixes.iter().any(|prefix| agent.starts_with(prefix.as_str()))
}

// ── Responses ───────────────────────────────────────────────────────────────

/// Wrap an event stream with headers that disable caching and buffering.
fn stream_response(stream: EventStream) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

fn landing_page(state: &AppState) -> Response {
    let base = state.config.links().base().to_owned();
    let page = format!(
        "tete: anonymous, ephemeral, two-party messaging\n\
         \n\
         start a conversation:\n\
         \x20   curl {base}\n\
         \n\
         join one (the other side prints the link):\n\
         \x20   curl {base}<conversation>\n\
         \n\
         send a message:\n\
         \x20   curl -T file.txt {base}<conversation>\n\
         \x20   echo hello | curl -T - {base}<conversation>\n\
         \n\
         read a message (once, then it is gone):\n\
         \x20   curl {base}<conversation>/<message>\n\
         \n\
         events:\n\
         \x20   : link     conversation created\n\
         \x20   > origin   party joined\n\
         \x20   < origin   party left\n\
         \x20   + link     message from the other party\n\
         \x20     link     your own message\n\
         \x20   - link     message read and removed\n\
         \x20   .          keepalive\n\
         \n\
         nothing is stored on disk; a conversation ends when both parties leave.\n"
    );
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], page).into_response()
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// GET /: create a conversation and stream its events.
async fn create(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !is_relay_client(&headers, &state.config.relay_user_agents) {
        return Ok(landing_page(&state));
    }
    let (connection, listener) = state.registry.attach(&origin);
    let connection_id = connection.id();
    let id = state.registry.create(connection)?;
    let departure = Departure::new(Arc::clone(&state.registry), id, connection_id);
    Ok(stream_response(listener.listen(departure)))
}

/// GET /{conversation}: join and stream events.
async fn join(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    ClientOrigin(origin): ClientOrigin,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !is_relay_client(&headers, &state.config.relay_user_agents) {
        return Ok(landing_page(&state));
    }
    if !state.registry.exists(&id) || state.registry.is_full(&id).await {
        debug!(conversation_id = %id, %origin, "join refused");
        return Ok(StatusCode::OK.into_response());
    }
    let (connection, listener) = state.registry.attach(&origin);
    let connection_id = connection.id();
    let _ = state.registry.join(&id, connection).await?;
    let departure = Departure::new(Arc::clone(&state.registry), id, connection_id);
    Ok(stream_response(listener.listen(departure)))
}

/// GET /{conversation}/{message}: read a message once.
async fn read(
    State(state): State<AppState>,
    Path((id, message)): Path<(ConversationId, MessageId)>,
    ClientOrigin(origin): ClientOrigin,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !is_relay_client(&headers, &state.config.relay_user_agents) {
        return Ok(landing_page(&state));
    }
    let data = state.registry.read_message(&id, &message, &origin).await?;
    Ok(data.into_response())
}

/// PUT /{conversation}: store the body as a message.
async fn write(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    ClientOrigin(origin): ClientOrigin,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let _ = state.registry.add_message(&id, body, &origin).await?;
    Ok(StatusCode::OK)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.is_shutting_down(),
        state.registry.conversation_count(),
        state.registry.connection_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
