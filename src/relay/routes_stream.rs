//! Stream Redirector: `GET /stream?type=&id=&season=&episode=`.

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use super::{RelayState, first_param};

/// Rendered in place of an absent season or episode.
const ABSENT: &str = "null";

pub fn stream_routes() -> Router<RelayState> {
    Router::new().route("/stream", get(stream_redirect))
}

#[derive(Debug, Default)]
pub struct StreamParams {
    pub kind: Option<String>,
    pub id: Option<String>,
    pub season: Option<String>,
    pub episode: Option<String>,
}

impl StreamParams {
    pub fn from_query(pairs: &[(String, String)]) -> Self {
        let param = |key: &str| first_param(pairs, key).map(str::to_owned);
        Self {
            kind: param("type"),
            id: param("id"),
            season: param("season"),
            episode: param("episode"),
        }
    }
}

/// Upstream embed URL for the request, or `None` when `type` or `id` is
/// missing. Season and episode are forwarded as given.
pub fn embed_target(state: &RelayState, params: &StreamParams) -> Option<String> {
    let kind = params.kind.as_deref().filter(|kind| !kind.is_empty())?;
    let id = params.id.as_deref().filter(|id| !id.is_empty())?;
    let upstream = state.upstream_config();
    let url = if kind == "movie" {
        upstream.movie_embed_url(id)
    } else {
        upstream.tv_embed_url(
            id,
            params.season.as_deref().unwrap_or(ABSENT),
            params.episode.as_deref().unwrap_or(ABSENT),
        )
    };
    Some(url)
}

async fn stream_redirect(
    State(state): State<RelayState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let params = StreamParams::from_query(&pairs);
    let Some(target) = embed_target(&state, &params) else {
        return (StatusCode::BAD_REQUEST, "Missing parameters").into_response();
    };

    match HeaderValue::from_str(&target) {
        Ok(location) => {
            (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, location)]).into_response()
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                id = ?params.id,
                "streaming error: redirect target is not a valid header value"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use crate::upstream::{Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};

    struct Unreachable;

    impl Upstream for Unreachable {
        fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
            Err(UpstreamError::Transport {
                url: request.url.clone(),
                reason: "not used".into(),
            })
        }
    }

    fn state() -> RelayState {
        RelayState::new(UpstreamConfig::new("embed.test"), Unreachable)
    }

    fn params(
        kind: Option<&str>,
        id: Option<&str>,
        season: Option<&str>,
        episode: Option<&str>,
    ) -> StreamParams {
        StreamParams {
            kind: kind.map(Into::into),
            id: id.map(Into::into),
            season: season.map(Into::into),
            episode: episode.map(Into::into),
        }
    }

    #[test]
    fn movie_target() {
        let target = embed_target(&state(), &params(Some("movie"), Some("tt123"), None, None));
        assert_eq!(target.as_deref(), Some("https://embed.test/embed/movie/tt123"));
    }

    #[test]
    fn any_other_type_is_series() {
        let target = embed_target(
            &state(),
            &params(Some("series"), Some("tt123"), Some("2"), Some("5")),
        );
        assert_eq!(
            target.as_deref(),
            Some("https://embed.test/embed/tv?imdb=tt123&season=2&episode=5")
        );
    }

    #[test]
    fn absent_episode_renders_null() {
        let target = embed_target(&state(), &params(Some("tv"), Some("tt9"), Some("1"), None));
        assert_eq!(
            target.as_deref(),
            Some("https://embed.test/embed/tv?imdb=tt9&season=1&episode=null")
        );
    }

    #[test]
    fn repeated_keys_take_the_first_value() {
        let pairs: Vec<(String, String)> = [("type", "movie"), ("type", "tv"), ("id", "1")]
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect();
        let target = embed_target(&state(), &StreamParams::from_query(&pairs));
        assert_eq!(target.as_deref(), Some("https://embed.test/embed/movie/1"));
    }

    #[test]
    fn missing_or_empty_required_params() {
        assert!(embed_target(&state(), &params(None, Some("tt1"), None, None)).is_none());
        assert!(embed_target(&state(), &params(Some("movie"), None, None, None)).is_none());
        assert!(embed_target(&state(), &params(Some("movie"), Some(""), None, None)).is_none());
    }
}
