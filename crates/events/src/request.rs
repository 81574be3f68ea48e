//! Request/response seam between the pipeline and the hosting server.
//!
//! The pipeline only sees [`RequestContext`]. [`HttpRequestContext`] is the
//! adapter for anything built on the `http` crate (axum, hyper, tower).

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, PoisonError};

use cookie::time::Duration;
use cookie::{Cookie, SameSite};
use http::{HeaderMap, Method, Uri};
use http::header::{COOKIE, HOST};
use http::request::Parts;

use crate::url::{Protocol, PublicUrl};

/// Identity cookies live for two years.
pub const COOKIE_MAX_AGE_DAYS: i64 = 730;

/// What the pipeline may read from the inbound request and write back to the
/// response.
pub trait RequestContext: Send + Sync {
    fn method(&self) -> &str;

    /// First value of a header, if present and valid UTF-8.
    fn header(&self, name: &str) -> Option<&str>;

    /// Decoded cookie value. Cookies set earlier in the same request are
    /// visible here.
    fn cookie(&self, name: &str) -> Option<String>;

    fn public_url(&self) -> &PublicUrl;

    /// Address of the directly connected peer, when the server exposes it.
    fn peer_ip(&self) -> Option<IpAddr>;

    /// Queue a `Set-Cookie` for the response. Path, expiry and SameSite
    /// follow the identity-cookie policy; `domain` is optional.
    fn set_cookie(&self, name: &str, value: &str, domain: Option<&str>);

    /// Queue an expired `Set-Cookie` so the browser drops `name`. Later
    /// `cookie()` reads on this request see it as absent.
    fn clear_cookie(&self, name: &str, domain: Option<&str>);
}

/// Build an identity cookie: path `/`, two-year max-age, `Secure` +
/// `SameSite=None` over HTTPS and `SameSite=Lax` otherwise.
pub fn identity_cookie(
    name: &str,
    value: &str,
    domain: Option<&str>,
    secure: bool,
) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), value.to_string()))
        .path("/")
        .max_age(Duration::days(COOKIE_MAX_AGE_DAYS))
        .secure(secure)
        .same_site(if secure { SameSite::None } else { SameSite::Lax });
    if let Some(domain) = domain.filter(|d| !d.is_empty()) {
        builder = builder.domain(domain.to_string());
    }
    builder.build()
}

#[derive(Debug)]
pub struct HttpRequestContext {
    method: String,
    headers: HeaderMap,
    url: PublicUrl,
    peer: Option<SocketAddr>,
    cookies: HashMap<String, String>,
    pending: Mutex<Vec<Cookie<'static>>>,
}

impl HttpRequestContext {
    pub fn new(method: &Method, uri: &Uri, headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        Self {
            method: method.as_str().to_string(),
            headers: headers.clone(),
            url: reconstruct_url(uri, headers),
            peer,
            cookies: parse_cookies(headers),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn from_parts(parts: &Parts, peer: Option<SocketAddr>) -> Self {
        Self::new(&parts.method, &parts.uri, &parts.headers, peer)
    }

    pub fn from_request<B>(request: &http::Request<B>, peer: Option<SocketAddr>) -> Self {
        Self::new(request.method(), request.uri(), request.headers(), peer)
    }

    /// Override the public URL (path override in the debug endpoint, tests).
    pub fn with_public_url(mut self, url: PublicUrl) -> Self {
        self.url = url;
        self
    }

    /// Encoded `Set-Cookie` header values queued so far, in order.
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|cookie| cookie.encoded().to_string())
            .collect()
    }
}

impl RequestContext for HttpRequestContext {
    fn method(&self) -> &str {
        &self.method
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cookie) = pending.iter().rev().find(|cookie| cookie.name() == name) {
            if cookie.max_age() == Some(Duration::ZERO) {
                return None;
            }
            return Some(cookie.value().to_string());
        }
        self.cookies.get(name).cloned()
    }

    fn public_url(&self) -> &PublicUrl {
        &self.url
    }

    fn peer_ip(&self) -> Option<IpAddr> {
        self.peer.map(|addr| addr.ip())
    }

    fn set_cookie(&self, name: &str, value: &str, domain: Option<&str>) {
        let secure = self.url.protocol == Protocol::Https;
        let cookie = identity_cookie(name, value, domain, secure);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cookie);
    }

    fn clear_cookie(&self, name: &str, domain: Option<&str>) {
        let secure = self.url.protocol == Protocol::Https;
        let mut cookie = identity_cookie(name, "", domain, secure);
        cookie.make_removal();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cookie);
    }
}

fn first_header_entry<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn split_host_port(authority: &str) -> (String, Option<String>) {
    // IPv6 literal: `[::1]:8080`
    if let Some(rest) = authority.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, port)) => (
                format!("[{host}]"),
                port.strip_prefix(':').map(str::to_string),
            ),
            None => (authority.to_string(), None),
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), Some(port.to_string())),
        None => (authority.to_string(), None),
    }
}

fn reconstruct_url(uri: &Uri, headers: &HeaderMap) -> PublicUrl {
    let protocol = first_header_entry(headers, "x-forwarded-proto")
        .map(Protocol::parse)
        .or_else(|| uri.scheme_str().map(Protocol::parse))
        .unwrap_or(Protocol::Http);

    let authority = first_header_entry(headers, "x-forwarded-host")
        .or_else(|| first_header_entry(headers, HOST.as_str()))
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.as_str().to_string()))
        .unwrap_or_else(|| "localhost".to_string());
    let (host, port) = split_host_port(&authority);

    let query = uri
        .query()
        .map(PublicUrl::parse_query)
        .unwrap_or_default();

    PublicUrl::new(protocol, host, port)
        .with_path(uri.path())
        .with_query(query)
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(COOKIE) {
        let Ok(raw) = value.to_str() else {
            continue;
        };
        for cookie in Cookie::split_parse_encoded(raw.to_string()).flatten() {
            cookies
                .entry(cookie.name().to_string())
                .or_insert_with(|| cookie.value().to_string());
        }
    }
    cookies
}
