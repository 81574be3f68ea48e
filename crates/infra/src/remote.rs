//! Bounded-timeout outbound HTTP call used by every destination.
//!
//! One attempt, no retry. The timeout covers the wait for response headers;
//! once they arrive the body is read without a deadline.

use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;

/// Error bodies beyond this many characters are cut.
pub const MAX_ERROR_BODY_CHARS: usize = 5000;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

const CLIENT_USER_AGENT: &str = concat!("beacon/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{method} {url} timeouts after {timeout_ms}ms (elapsed {elapsed_ms}ms)")]
    Timeout {
        method: String,
        url: String,
        timeout_ms: u64,
        elapsed_ms: u64,
    },

    #[error("{method} {url} failed with status {status}: {body}")]
    Http {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("{method} {url} failed: {source}")]
    Network {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url} returned an unreadable body: {reason}")]
    Decode {
        method: String,
        url: String,
        reason: String,
    },

    #[error("invalid request to {url}: {reason}")]
    InvalidRequest { url: String, reason: String },
}

impl RemoteError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Timeout { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// How to treat a successful response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseBody {
    /// Parse as JSON; an empty body reads as `null`.
    #[default]
    Json,
    /// Don't read it (endpoints that reply with plain text).
    Ignore,
}

#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub payload: Option<Value>,
    pub timeout: Duration,
    pub response_body: ResponseBody,
}

impl RemoteRequest {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: Vec::new(),
            payload: None,
            timeout: DEFAULT_TIMEOUT,
            response_body: ResponseBody::Json,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post(payload: Value) -> Self {
        Self::new(Method::POST).with_payload(payload)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Later headers replace earlier ones with the same name, including the
    /// defaults (`Accept`, `User-Agent`).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ignore_body(mut self) -> Self {
        self.response_body = ResponseBody::Ignore;
        self
    }
}

pub async fn remote_call(
    client: &Client,
    url: &str,
    request: RemoteRequest,
) -> Result<Value, RemoteError> {
    let method = request.method.to_string();
    let headers = build_headers(url, &request.headers)?;

    let mut builder = client.request(request.method.clone(), url).headers(headers);
    if let Some(payload) = &request.payload {
        // Sets `Content-Type: application/json` unless a header above did.
        builder = builder.json(payload);
    }

    let started = Instant::now();
    let timeout_error = || RemoteError::Timeout {
        method: method.clone(),
        url: url.to_string(),
        timeout_ms: request.timeout.as_millis() as u64,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    let response = match timeout(request.timeout, builder.send()).await {
        Err(_elapsed) => return Err(timeout_error()),
        Ok(Err(error)) if error.is_timeout() => return Err(timeout_error()),
        Ok(Err(source)) => {
            return Err(RemoteError::Network {
                method,
                url: url.to_string(),
                source,
            });
        }
        Ok(Ok(response)) => response,
    };

    let status = response.status();
    if !status.is_success() {
        let body = read_capped(response, MAX_ERROR_BODY_CHARS).await;
        return Err(RemoteError::Http {
            method,
            url: url.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    match request.response_body {
        ResponseBody::Ignore => Ok(Value::Null),
        ResponseBody::Json => {
            let text = response
                .text()
                .await
                .map_err(|source| RemoteError::Network {
                    method: method.clone(),
                    url: url.to_string(),
                    source,
                })?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&text).map_err(|error| RemoteError::Decode {
                method,
                url: url.to_string(),
                reason: error.to_string(),
            })
        }
    }
}

fn build_headers(url: &str, extra: &[(String, String)]) -> Result<HeaderMap, RemoteError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    for (name, value) in extra {
        let invalid = |reason: String| RemoteError::InvalidRequest {
            url: url.to_string(),
            reason,
        };
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| invalid(format!("header value for {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Read an error body only as far as needed to fill `max_chars`, then cap
/// it. A body cut short reports the length read, not the full length.
async fn read_capped(mut response: reqwest::Response, max_chars: usize) -> String {
    // Enough bytes for `max_chars + 1` characters of any width.
    let limit = max_chars.saturating_mul(4).saturating_add(4);
    let mut buf = Vec::new();
    while buf.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }
    buf.truncate(limit);
    truncate_body(&String::from_utf8_lossy(&buf), max_chars)
}

/// Cap `body` at `max` characters, noting the original length.
pub fn truncate_body(body: &str, max: usize) -> String {
    let len = body.chars().count();
    if len <= max {
        return body.to_string();
    }
    let head: String = body.chars().take(max).collect();
    format!("{head}... (truncated; len={len})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::{get, post};
    use serde_json::json;

    async fn spawn_server() -> (String, tokio::task::JoinHandle<()>) {
        let app = Router::new()
            .route("/ok", get(|| async { axum::Json(json!({"ok": true, "n": 3})) }))
            .route(
                "/echo-headers",
                post(|headers: AxumHeaders, body: String| async move {
                    let header = |name: &str| {
                        headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string()
                    };
                    axum::Json(json!({
                        "accept": header("accept"),
                        "contentType": header("content-type"),
                        "userAgent": header("user-agent"),
                        "custom": header("x-custom"),
                        "body": body,
                    }))
                }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(400)).await;
                    axum::Json(json!({"late": true}))
                }),
            )
            .route(
                "/fail",
                get(|| async { (StatusCode::BAD_GATEWAY, "x".repeat(6000)) }),
            )
            .route(
                "/fail-huge",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "y".repeat(4_000_000)) }),
            )
            .route("/empty", post(|| async { StatusCode::NO_CONTENT }))
            .route("/text", post(|| async { "ok" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn resolves_with_parsed_json() {
        let (base, server) = spawn_server().await;
        let body = remote_call(&Client::new(), &format!("{base}/ok"), RemoteRequest::get())
            .await
            .unwrap();
        assert_eq!(body, json!({"ok": true, "n": 3}));
        server.abort();
    }

    #[tokio::test]
    async fn sends_json_payload_with_default_headers() {
        let (base, server) = spawn_server().await;
        let body = remote_call(
            &Client::new(),
            &format!("{base}/echo-headers"),
            RemoteRequest::post(json!({"a": 1})).with_header("X-Custom", "yes"),
        )
        .await
        .unwrap();

        assert_eq!(body["accept"], "application/json");
        assert_eq!(body["contentType"], "application/json");
        assert!(body["userAgent"].as_str().unwrap().starts_with("beacon/"));
        assert_eq!(body["custom"], "yes");
        assert_eq!(body["body"], r#"{"a":1}"#);
        server.abort();
    }

    #[tokio::test]
    async fn slow_server_times_out_with_elapsed_time() {
        let (base, server) = spawn_server().await;
        let err = remote_call(
            &Client::new(),
            &format!("{base}/slow"),
            RemoteRequest::get().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

        match &err {
            RemoteError::Timeout {
                timeout_ms,
                elapsed_ms,
                ..
            } => {
                assert_eq!(*timeout_ms, 100);
                assert!(*elapsed_ms >= 100);
                assert!(err.to_string().contains(&format!("elapsed {elapsed_ms}ms")));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(err.to_string().contains("timeouts after 100ms"));
        server.abort();
    }

    #[tokio::test]
    async fn non_success_carries_status_and_truncated_body() {
        let (base, server) = spawn_server().await;
        let err = remote_call(&Client::new(), &format!("{base}/fail"), RemoteRequest::get())
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(502));
        match err {
            RemoteError::Http { body, .. } => {
                assert!(body.ends_with("... (truncated; len=6000)"));
                assert!(body.starts_with(&"x".repeat(MAX_ERROR_BODY_CHARS)));
            }
            other => panic!("expected http error, got {other:?}"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn huge_error_bodies_are_not_read_to_the_end() {
        let (base, server) = spawn_server().await;
        let err = remote_call(&Client::new(), &format!("{base}/fail-huge"), RemoteRequest::get())
            .await
            .unwrap_err();

        let RemoteError::Http { body, .. } = err else {
            panic!("expected http error");
        };
        assert!(body.starts_with(&"y".repeat(MAX_ERROR_BODY_CHARS)));
        let read: usize = body
            .rsplit("len=")
            .next()
            .and_then(|len| len.trim_end_matches(')').parse().ok())
            .unwrap();
        assert!(read > MAX_ERROR_BODY_CHARS);
        assert!(read < 4_000_000, "read the whole body ({read} chars)");
        server.abort();
    }

    #[tokio::test]
    async fn empty_and_ignored_bodies_read_as_null() {
        let (base, server) = spawn_server().await;
        let client = Client::new();
        let empty = remote_call(&client, &format!("{base}/empty"), RemoteRequest::post(json!({})))
            .await
            .unwrap();
        assert_eq!(empty, Value::Null);

        let text = remote_call(
            &client,
            &format!("{base}/text"),
            RemoteRequest::post(json!({})).ignore_body(),
        )
        .await
        .unwrap();
        assert_eq!(text, Value::Null);

        let undecodable =
            remote_call(&client, &format!("{base}/text"), RemoteRequest::post(json!({}))).await;
        assert!(matches!(undecodable, Err(RemoteError::Decode { .. })));
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        // Port 9 (discard) is closed on loopback in test environments.
        let err = remote_call(&Client::new(), "http://127.0.0.1:9/", RemoteRequest::get())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Network { .. }));
    }

    #[test]
    fn truncation_keeps_short_bodies() {
        assert_eq!(truncate_body("short", 10), "short");
        assert_eq!(truncate_body("ééééé", 2), "éé... (truncated; len=5)");
    }
}
