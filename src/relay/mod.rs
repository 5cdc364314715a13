//! HTTP surface of the relay.
//!
//! Every route is an independent entry point: the Path Proxy, the Stream
//! Redirector and the Token-Gated Watch Relay never call each other. The
//! upstream host, the clock and the optional history store are injected
//! through [`RelayState`].

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use thiserror::Error;
use tokio::task;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::config::{DEFAULT_TOKEN_TTL_MS, UpstreamConfig};
use crate::history::HistoryStore;
use crate::security::security_headers;
use crate::token::{Clock, SystemClock};
use crate::upstream::{Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};

pub mod routes_history;
pub mod routes_proxy;
pub mod routes_stream;
pub mod routes_watch;

/// Shared, cheaply cloneable handler state.
#[derive(Clone)]
pub struct RelayState {
    upstream: Arc<dyn Upstream>,
    config: Arc<UpstreamConfig>,
    clock: Arc<dyn Clock>,
    token_ttl_ms: i64,
    history: Option<Arc<dyn HistoryStore>>,
}

impl RelayState {
    pub fn new(config: UpstreamConfig, upstream: impl Upstream) -> Self {
        Self {
            upstream: Arc::new(upstream),
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            token_ttl_ms: DEFAULT_TOKEN_TTL_MS,
            history: None,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_token_ttl_ms(mut self, token_ttl_ms: i64) -> Self {
        self.token_ttl_ms = token_ttl_ms;
        self
    }

    pub fn with_history(mut self, store: impl HistoryStore) -> Self {
        self.history = Some(Arc::new(store));
        self
    }

    pub fn upstream_config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Runs the blocking upstream client on tokio's blocking pool and waits
    /// for the fully buffered response.
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        let upstream = self.upstream.clone();
        let response = task::spawn_blocking(move || upstream.fetch(&request)).await??;
        Ok(response)
    }
}

#[derive(Debug, Error)]
enum FetchError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("upstream worker failed: {0}")]
    Worker(#[from] task::JoinError),
}

/// JSON error body `{"error": message}` with a fixed status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// First value of `key` in a decoded query string, matching how browsers read
/// `searchParams`. Later repeats of the key are ignored.
fn first_param<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
}

/// Builds the relay router. History routes are only mounted when a store is
/// configured.
pub fn create_router(state: RelayState) -> Router {
    let stream_routes = routes_stream::stream_routes().layer(middleware::from_fn(security_headers));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .merge(routes_proxy::proxy_routes())
        .merge(routes_watch::watch_routes())
        .merge(stream_routes);

    if let Some(store) = state.history.clone() {
        app = app.merge(routes_history::history_routes(store, state.clock.clone()));
        tracing::info!("History routes enabled");
    }

    app.layer(SetResponseHeaderLayer::if_not_present(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    ))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
