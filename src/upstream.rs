//! Outbound fetches against the upstream embed host.
//!
//! The client is blocking (`ureq`); handlers run it on tokio's blocking pool.
//! The [`Upstream`] trait is the seam tests use to stand in for the real host.

use std::io::Read;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("reading body from {url} failed: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct UpstreamRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A fully buffered upstream response. Header names are lowercase.
#[derive(Debug, Clone, Default)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Upstream: Send + Sync + 'static {
    /// Performs a GET and buffers the whole response. Non-2xx statuses are
    /// returned as responses, not errors.
    fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// Production client backed by a shared `ureq` agent.
#[derive(Clone)]
pub struct UreqUpstream {
    agent: ureq::Agent,
}

impl UreqUpstream {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl Default for UreqUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl Upstream for UreqUpstream {
    fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let mut call = self.agent.get(&request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }

        let response = match call.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => {
                return Err(UpstreamError::Transport {
                    url: request.url.clone(),
                    reason: err.to_string(),
                });
            }
        };

        let status = response.status();
        // `headers_names` yields a name once per header line, so repeated
        // headers are collected on the first occurrence only.
        let mut names: Vec<String> = Vec::new();
        for name in response.headers_names() {
            let name = name.to_ascii_lowercase();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        let mut headers = Vec::new();
        for name in names {
            for value in response.all(&name) {
                headers.push((name.clone(), value.to_string()));
            }
        }

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|source| UpstreamError::Body {
                url: request.url.clone(),
                source,
            })?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    /// Serves one canned HTTP response on a local port and returns its URL.
    fn serve_once(raw_response: &'static str) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/page", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                let read = stream.read(&mut buf).unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
            }
            stream.write_all(raw_response.as_bytes()).unwrap();
        });
        (url, handle)
    }

    #[test]
    fn repeated_headers_are_collected_once_each() {
        let (url, server) = serve_once(concat!(
            "HTTP/1.1 200 OK\r\n",
            "Set-Cookie: a=1\r\n",
            "Set-Cookie: b=2\r\n",
            "Content-Type: text/plain\r\n",
            "Content-Length: 2\r\n",
            "Connection: close\r\n",
            "\r\n",
            "ok",
        ));

        let response = UreqUpstream::new().fetch(&UpstreamRequest::get(url)).unwrap();
        server.join().unwrap();

        let cookies: Vec<&str> = response
            .headers
            .iter()
            .filter(|(name, _)| name == "set-cookie")
            .map(|(_, value)| value.as_str())
            .collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"ok");
    }

    #[test]
    fn error_status_is_a_response() {
        let (url, server) = serve_once(concat!(
            "HTTP/1.1 404 Not Found\r\n",
            "Content-Length: 7\r\n",
            "Connection: close\r\n",
            "\r\n",
            "missing",
        ));

        let response = UreqUpstream::new().fetch(&UpstreamRequest::get(url)).unwrap();
        server.join().unwrap();

        assert_eq!(response.status, 404);
        assert!(!response.is_success());
        assert_eq!(response.body, b"missing");
    }
}
