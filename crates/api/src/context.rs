use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::SET_COOKIE;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::Response;
use beacon_events::HttpRequestContext;
use beacon_infra::{Collector, ServerAnalytics};

/// Request context for a full request. The peer address is taken from
/// `ConnectInfo` when the server was started with connect info.
pub fn request_context<B>(req: &Request<B>) -> HttpRequestContext {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    HttpRequestContext::from_request(req, peer)
}

/// Extractor handing handlers a shared request context. Behind the tracking
/// middleware this is the same context the page event is built from, so
/// cookies queued by the handler end up on the response.
#[derive(Debug, Clone)]
pub struct Tracked(pub Arc<HttpRequestContext>);

#[async_trait]
impl<S> FromRequestParts<S> for Tracked
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<Arc<HttpRequestContext>>() {
            return Ok(Tracked(ctx.clone()));
        }
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Tracked(Arc::new(HttpRequestContext::from_parts(parts, peer))))
    }
}

/// Server-side analytics for handlers of a tracked site.
///
/// Only available behind the tracking middleware, which provides the
/// collector and the request context.
#[derive(Debug, Clone)]
pub struct Analytics {
    collector: Arc<Collector>,
    ctx: Arc<HttpRequestContext>,
}

impl Analytics {
    pub fn handle(&self) -> ServerAnalytics<'_> {
        self.collector.analytics(self.ctx.as_ref())
    }

    pub fn context(&self) -> &Arc<HttpRequestContext> {
        &self.ctx
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Analytics
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let collector = parts.extensions.get::<Arc<Collector>>().cloned();
        let ctx = parts.extensions.get::<Arc<HttpRequestContext>>().cloned();
        match (collector, ctx) {
            (Some(collector), Some(ctx)) => Ok(Analytics { collector, ctx }),
            _ => Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "analytics requires the tracking middleware",
            )),
        }
    }
}

/// Copy cookies queued on `ctx` onto the response.
pub fn append_set_cookies(response: &mut Response, ctx: &HttpRequestContext) {
    for cookie in ctx.set_cookie_headers() {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "dropping unencodable Set-Cookie header"),
        }
    }
}
