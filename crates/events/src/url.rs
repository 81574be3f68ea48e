//! Public URL of a request, as the browser saw it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// Parse `http`, `https`, `https:` or `https://` (case-insensitive).
    /// Anything unrecognized is treated as plain http.
    pub fn parse(value: &str) -> Self {
        let value = beacon_core::json::remove_suffix(value.trim(), &["/", ":"]);
        if value.eq_ignore_ascii_case("https") {
            Protocol::Https
        } else {
            Protocol::Http
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    fn default_port(&self) -> &'static str {
        match self {
            Protocol::Http => "80",
            Protocol::Https => "443",
        }
    }
}

/// Decomposed public URL.
///
/// Only plain data, so it serializes cleanly. The query keeps the order in
/// which parameters appeared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUrl {
    pub protocol: Protocol,
    /// Host without port.
    pub host: String,
    /// Only present when it is not the default port for the protocol.
    pub port: Option<String>,
    /// Always starts with `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl PublicUrl {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: Option<String>) -> Self {
        let port = port.filter(|p| !p.is_empty() && p != protocol.default_port());
        Self {
            protocol,
            host: host.into(),
            port,
            path: "/".to_string(),
            query: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Parse a raw query string (`a=1&b=two%20words`), decoding values.
    pub fn parse_query(raw: &str) -> Vec<(String, String)> {
        raw.split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_component(key), decode_component(value))
            })
            .collect()
    }

    pub fn host_with_port(&self) -> String {
        match &self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// `?a=1&b=2` with values re-encoded, or an empty string.
    pub fn query_string(&self) -> String {
        if self.query.is_empty() {
            return String::new();
        }
        let pairs: Vec<String> = self
            .query
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect();
        format!("?{}", pairs.join("&"))
    }

    /// Full external URL: scheme + host + path + re-encoded query.
    pub fn to_url_string(&self) -> String {
        format!(
            "{}://{}{}{}",
            self.protocol.as_str(),
            self.host_with_port(),
            self.path,
            self.query_string()
        )
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

/// Multi-label public suffixes where the registrable domain needs one more label.
const SHARED_SUFFIXES: &[&str] = &[
    "vercel.app",
    "herokuapp.com",
    "co.uk",
    "com.au",
    "fly.dev",
    "fly.io",
    "netlify.app",
    "render.com",
    "now.sh",
];

/// Registrable domain of a host, used as the default cookie domain.
///
/// `app.example.com` → `example.com`; `my-app.vercel.app` stays as is since
/// `vercel.app` is a shared suffix; hosts with two labels or fewer are
/// returned unchanged.
pub fn primary_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host.to_string();
    }
    let last_two = labels[labels.len() - 2..].join(".");
    let is_shared = SHARED_SUFFIXES
        .iter()
        .any(|suffix| suffix.eq_ignore_ascii_case(&last_two));
    if is_shared {
        labels[labels.len() - 3..].join(".")
    } else {
        last_two
    }
}

/// Host part of a referrer URL, or `None` if it cannot be parsed.
pub fn referring_domain(referrer: &str) -> Option<String> {
    let (_, rest) = referrer.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}
