//! Origin masking for the embed page served by the watch relay.
//!
//! The rewrite is plain text substitution in three passes, each feeding the
//! next:
//!
//! 1. the upstream embed base URL becomes the local proxy prefix;
//! 2. the bare upstream hostname becomes the caller's `Host`;
//! 3. any `https://` URL still pointing at the upstream domain is wrapped as
//!    `/proxy/{base64(url)}`.
//!
//! Applying it to its own output is a no-op.

use std::sync::LazyLock;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use regex::Regex;

static HTTPS_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https://[^"'\s<>]+"#).expect("static regex"));

/// Inputs for [`rewrite_embed_html`].
#[derive(Debug, Clone)]
pub struct RewriteContext<'a> {
    pub embed_base_url: &'a str,
    pub upstream_host: &'a str,
    pub request_host: &'a str,
    pub proxy_prefix: &'a str,
}

pub fn rewrite_embed_html(html: &str, ctx: &RewriteContext<'_>) -> String {
    let pass1 = if ctx.embed_base_url.is_empty() {
        html.to_string()
    } else {
        html.replace(ctx.embed_base_url, ctx.proxy_prefix)
    };
    let pass2 = replace_host(&pass1, ctx.upstream_host, ctx.request_host);
    wrap_upstream_urls(&pass2, ctx.upstream_host, ctx.proxy_prefix)
}

/// Replaces `upstream` with `replacement`, skipping occurrences that already
/// sit inside `replacement` (e.g. a relay served from `upstream.relay.test`).
fn replace_host(text: &str, upstream: &str, replacement: &str) -> String {
    if upstream.is_empty() {
        return text.to_string();
    }
    if replacement.is_empty() || !replacement.contains(upstream) {
        return text.replace(upstream, replacement);
    }
    text.split(replacement)
        .map(|segment| segment.replace(upstream, replacement))
        .collect::<Vec<_>>()
        .join(replacement)
}

fn wrap_upstream_urls(text: &str, upstream_host: &str, proxy_prefix: &str) -> String {
    HTTPS_URL
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let url = &caps[0];
            if points_at(url, upstream_host) {
                format!("{proxy_prefix}{}", STANDARD.encode(url))
            } else {
                url.to_string()
            }
        })
        .into_owned()
}

/// True when the URL's host is `upstream_host` or one of its subdomains.
fn points_at(url: &str, upstream_host: &str) -> bool {
    if upstream_host.is_empty() {
        return false;
    }
    let rest = url.strip_prefix("https://").unwrap_or(url);
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default().to_ascii_lowercase();
    let upstream = upstream_host.to_ascii_lowercase();
    host == upstream || host.ends_with(&format!(".{upstream}"))
}
