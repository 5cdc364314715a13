//! Token-Gated Watch Relay: `GET /watch?token=`.
//!
//! Validates the access token, fetches the upstream embed page server-side
//! and serves it with every upstream reference rewritten to point back at
//! this relay.

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use thiserror::Error;

use super::{ApiError, FetchError, RelayState, first_param};
use crate::config::PROXY_ROUTE_PREFIX;
use crate::rewrite::{RewriteContext, rewrite_embed_html};
use crate::token::{AccessToken, TokenError};
use crate::upstream::UpstreamRequest;

pub fn watch_routes() -> Router<RelayState> {
    Router::new().route("/watch", get(watch))
}

#[derive(Debug, Error)]
enum WatchError {
    #[error("missing token")]
    MissingToken,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("fetching embed page failed: {0}")]
    Fetch(FetchError),
    #[error("embed page returned status {0}")]
    UpstreamStatus(u16),
    #[error("watch worker failed: {0}")]
    Internal(FetchError),
}

impl WatchError {
    fn log(&self) {
        match self {
            WatchError::MissingToken => {}
            WatchError::Token(err) if err.is_expired() => {
                tracing::info!(error = %err, "watch token expired")
            }
            WatchError::Token(err) => tracing::warn!(error = %err, "token decode error"),
            WatchError::Fetch(_) | WatchError::UpstreamStatus(_) => {
                tracing::error!(error = %self, "embed page fetch failed")
            }
            WatchError::Internal(_) => tracing::error!(error = %self, "watch error"),
        }
    }
}

impl IntoResponse for WatchError {
    fn into_response(self) -> Response {
        self.log();
        // Upstream failures are reported exactly like a bad token.
        let error = match &self {
            WatchError::MissingToken => ApiError::unauthorized("Unauthorized"),
            WatchError::Token(err) if err.is_expired() => ApiError::unauthorized("Token expired"),
            WatchError::Token(_) | WatchError::Fetch(_) | WatchError::UpstreamStatus(_) => {
                ApiError::unauthorized("Invalid token")
            }
            WatchError::Internal(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };
        error.into_response()
    }
}

async fn watch(
    State(state): State<RelayState>,
    Query(pairs): Query<Vec<(String, String)>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, WatchError> {
    let token = first_param(&pairs, "token")
        .filter(|token| !token.is_empty())
        .ok_or(WatchError::MissingToken)?;
    let access = AccessToken::validate(token, state.clock.now_ms(), state.token_ttl_ms)?;

    let request = UpstreamRequest::get(state.config.watch_url(&access.identifier));
    let page = state.fetch(request).await.map_err(|err| match err {
        FetchError::Worker(_) => WatchError::Internal(err),
        FetchError::Upstream(_) => WatchError::Fetch(err),
    })?;
    if !page.is_success() {
        return Err(WatchError::UpstreamStatus(page.status));
    }

    let request_host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .unwrap_or_default();

    let html = String::from_utf8_lossy(&page.body);
    let rewritten = rewrite_embed_html(
        &html,
        &RewriteContext {
            embed_base_url: state.config.embed_base_url(),
            upstream_host: state.config.host(),
            request_host,
            proxy_prefix: PROXY_ROUTE_PREFIX,
        },
    );

    tracing::debug!(
        identifier = %access.identifier,
        bytes = rewritten.len(),
        "serving rewritten embed page"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/html"),
            (header::X_FRAME_OPTIONS, "SAMEORIGIN"),
        ],
        rewritten,
    )
        .into_response())
}
