//! Classification of the opaque path handed to the Path Proxy.

use crate::config::UpstreamConfig;
use crate::token::decode_lenient;

/// What an opaque `/proxy/...` path turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyTarget {
    /// Base64 of an absolute `http(s)` URL.
    AbsoluteUrl(String),
    /// Plain sub-path of the upstream host.
    Literal(String),
    /// Decoded as base64, but the payload is not a URL.
    Malformed(String),
}

impl ProxyTarget {
    pub fn classify(path: &str) -> Self {
        let Ok(bytes) = decode_lenient(path) else {
            return ProxyTarget::Literal(path.to_string());
        };
        match String::from_utf8(bytes) {
            Ok(url) if url.starts_with("http") => ProxyTarget::AbsoluteUrl(url),
            _ => ProxyTarget::Malformed(path.to_string()),
        }
    }

    /// Upstream URL to fetch. Malformed paths fall back to the literal form.
    pub fn resolve(&self, upstream: &UpstreamConfig) -> String {
        match self {
            ProxyTarget::AbsoluteUrl(url) => url.clone(),
            ProxyTarget::Literal(path) | ProxyTarget::Malformed(path) => {
                upstream.literal_url(path)
            }
        }
    }
}
