//! Path Proxy: `GET /proxy/{*path}`.
//!
//! Fetches an upstream resource on the caller's behalf and re-serves it with
//! the headers that identify the upstream removed.

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
    routing::get,
};

use super::{ApiError, ApiResult, FetchError, RelayState};
use crate::proxy_path::ProxyTarget;
use crate::upstream::{UpstreamRequest, UpstreamResponse};

/// Response headers that can reveal the upstream's identity.
const ORIGIN_REVEALING: [&str; 4] = ["server", "alt-svc", "report-to", "nel"];

/// Framing headers that no longer describe the re-buffered, decoded body.
const HOP_BY_HOP: [&str; 5] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "content-encoding",
];

const PROXY_CACHE_CONTROL: &str = "public, max-age=3600";

pub fn proxy_routes() -> Router<RelayState> {
    Router::new().route("/proxy/{*path}", get(proxy))
}

async fn proxy(
    State(state): State<RelayState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let upstream = fetch_target(&state, &path, &headers)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "proxy error");
            ApiError::internal("Proxy error")
        })?;

    relay_response(upstream).map_err(|err| {
        tracing::error!(error = %err, "proxy error");
        ApiError::internal("Proxy error")
    })
}

async fn fetch_target(
    state: &RelayState,
    path: &str,
    headers: &HeaderMap,
) -> Result<UpstreamResponse, FetchError> {
    let target = ProxyTarget::classify(path);
    if let ProxyTarget::Malformed(raw) = &target {
        tracing::debug!(path = %raw, "proxy path decoded to a non-URL; treating it as literal");
    }
    let url = target.resolve(&state.config);

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let request = UpstreamRequest::get(url)
        .header("User-Agent", user_agent)
        .header("Referer", state.config.referer())
        .header("Origin", state.config.origin());

    state.fetch(request).await
}

#[derive(Debug, thiserror::Error)]
#[error("upstream returned unusable status {0}")]
pub struct InvalidStatus(u16);

/// Turns a buffered upstream response into the relayed one: same status and
/// body, filtered headers, forced CORS and caching.
pub fn relay_response(upstream: UpstreamResponse) -> Result<Response, InvalidStatus> {
    let status =
        StatusCode::from_u16(upstream.status).map_err(|_| InvalidStatus(upstream.status))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &upstream.headers {
        let lower = name.to_ascii_lowercase();
        if ORIGIN_REVEALING.contains(&lower.as_str()) || HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        match (
            HeaderName::from_bytes(lower.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::debug!(header = %lower, "dropping unrepresentable upstream header"),
        }
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(PROXY_CACHE_CONTROL),
    );

    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(headers: &[(&str, &str)]) -> UpstreamResponse {
        UpstreamResponse {
            status: 200,
            headers: headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: b"body".to_vec(),
        }
    }

    #[test]
    fn strips_origin_headers_case_insensitively() {
        let response = relay_response(upstream(&[
            ("Server", "cloudflare"),
            ("alt-svc", "h3=\":443\""),
            ("Report-To", "{}"),
            ("NEL", "{}"),
            ("content-type", "application/javascript"),
            ("x-custom", "kept"),
        ]))
        .unwrap();

        let headers = response.headers();
        for name in ORIGIN_REVEALING {
            assert!(headers.get(name).is_none(), "{name} leaked");
        }
        assert_eq!(headers["content-type"], "application/javascript");
        assert_eq!(headers["x-custom"], "kept");
    }

    #[test]
    fn forces_cors_and_cache_headers() {
        let response = relay_response(upstream(&[
            ("access-control-allow-origin", "https://embed.test"),
            ("cache-control", "no-store"),
        ]))
        .unwrap();

        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(response.headers()["cache-control"], PROXY_CACHE_CONTROL);
        assert_eq!(
            response
                .headers()
                .get_all(header::CACHE_CONTROL)
                .iter()
                .count(),
            1
        );
    }

    #[test]
    fn keeps_repeated_headers() {
        let response = relay_response(upstream(&[
            ("set-cookie", "a=1"),
            ("set-cookie", "b=2"),
        ]))
        .unwrap();
        assert_eq!(
            response
                .headers()
                .get_all(header::SET_COOKIE)
                .iter()
                .count(),
            2
        );
    }

    #[test]
    fn relays_status_and_rejects_garbage_status() {
        let mut not_found = upstream(&[]);
        not_found.status = 404;
        assert_eq!(
            relay_response(not_found).unwrap().status(),
            StatusCode::NOT_FOUND
        );

        let mut bogus = upstream(&[]);
        bogus.status = 42;
        assert!(relay_response(bogus).is_err());
    }
}
