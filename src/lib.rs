#![forbid(unsafe_code)]

//! Origin-masking relay for a streaming-catalog front end.
//!
//! The relay sits between browsers and a third-party embed host. It proxies
//! upstream resources, redirects to embed URLs and serves token-gated embed
//! pages rewritten so the upstream host never appears to the client.

pub mod config;
pub mod history;
pub mod proxy_path;
pub mod relay;
pub mod rewrite;
pub mod security;
pub mod token;
pub mod upstream;
