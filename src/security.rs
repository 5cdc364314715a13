#![forbid(unsafe_code)]

//! Shared security helpers used by the relay binaries and router.

use anyhow::{Result, bail};
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use nix::unistd::Uid;

const CONTENT_SECURITY_POLICY: &str = concat!(
    "default-src 'self' https: http:; ",
    "script-src 'self' 'unsafe-inline' 'unsafe-eval'; ",
    "style-src 'self' 'unsafe-inline'; ",
    "img-src 'self' https: http: data:; ",
    "media-src 'self' https: http:; ",
    "frame-src 'self' https: http:; ",
    "connect-src 'self' https: http:",
);

/// Fails fast when a binary is started as root. The relay only needs to bind
/// an unprivileged port and make outbound HTTPS requests.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::current().is_root() {
        bail!("{process} must not be run as root; start it under an unprivileged account");
    }
    Ok(())
}

/// Middleware adding the browser hardening headers to every response of the
/// routes it wraps. Framing stays allowed for same-origin pages so the player
/// can be embedded by the catalog UI.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    let fixed: [(HeaderName, &'static str); 5] = [
        (header::X_FRAME_OPTIONS, "SAMEORIGIN"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
        (header::X_XSS_PROTECTION, "1; mode=block"),
        (header::CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY),
    ];
    for (name, value) in fixed {
        headers.insert(name, HeaderValue::from_static(value));
    }
    response
}
