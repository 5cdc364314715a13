//! Search-history routes.
//!
//! The user is identified by the `X-User-Id` header, which the identity
//! provider in front of the relay asserts. Store calls run on the blocking
//! pool. The routes carry their own state so they only exist alongside a
//! configured store.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::get,
};
use chrono::{DateTime, Utc};
use tokio::task;

use super::{ApiError, ApiResult, RelayState};
use crate::history::{HistoryEntry, HistoryStore, NewHistoryEntry, RECENT_LIMIT};
use crate::token::Clock;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
struct HistoryState {
    store: Arc<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
}

pub fn history_routes(store: Arc<dyn HistoryStore>, clock: Arc<dyn Clock>) -> Router<RelayState> {
    Router::new()
        .route(
            "/history",
            get(list_history).post(record_history).delete(clear_history),
        )
        .with_state(HistoryState { store, clock })
}

fn user_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ApiError::unauthorized("Unauthorized"))
}

async fn run_store<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "history task join error");
            ApiError::internal("History unavailable")
        })?
        .map_err(|err| {
            tracing::error!(error = %format!("{err:#}"), "history store error");
            ApiError::internal("History unavailable")
        })
}

async fn list_history(
    State(state): State<HistoryState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let store = state.store.clone();
    let user = user_id(&headers)?;
    let entries = run_store(move || store.recent(&user, RECENT_LIMIT)).await?;
    Ok(Json(entries))
}

async fn record_history(
    State(state): State<HistoryState>,
    headers: HeaderMap,
    Json(entry): Json<NewHistoryEntry>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let store = state.store.clone();
    let user = user_id(&headers)?;
    if entry.movie_id.trim().is_empty() || entry.movie_title.trim().is_empty() {
        return Err(ApiError::bad_request("movie_id and movie_title are required"));
    }

    let at = DateTime::from_timestamp_millis(state.clock.now_ms()).unwrap_or_else(Utc::now);
    let entries = run_store(move || {
        store.record(&user, &entry, at)?;
        store.recent(&user, RECENT_LIMIT)
    })
    .await?;
    Ok(Json(entries))
}

async fn clear_history(
    State(state): State<HistoryState>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let store = state.store.clone();
    let user = user_id(&headers)?;
    let removed = run_store(move || store.clear(&user)).await?;
    tracing::debug!(removed, "cleared search history");
    Ok(StatusCode::NO_CONTENT)
}
