use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use beacon_events::RequestContext;
use beacon_infra::Collector;

use crate::config::Settings;
use crate::context::{append_set_cookies, request_context};

#[derive(Clone)]
pub struct TrackingState {
    pub collector: Arc<Collector>,
    pub settings: Arc<Settings>,
}

/// Runs the page handler, then tracks the request in fire-and-forget mode
/// and attaches identity cookies to the response.
///
/// The handler can reach the request context and the collector through the
/// `Tracked` and `Analytics` extractors. Requests to the collector's own
/// endpoints pass through untouched.
pub async fn tracking_middleware(
    State(state): State<TrackingState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if state.settings.is_api_path(req.uri().path()) {
        return next.run(req).await;
    }

    let ctx = Arc::new(request_context(&req));
    req.extensions_mut().insert(ctx.clone());
    req.extensions_mut().insert(state.collector.clone());
    let mut response = next.run(req).await;

    let shared: Arc<dyn RequestContext> = ctx.clone();
    if state.collector.track(shared).await.is_some() {
        tracing::debug!(path = %ctx.public_url().path, "page event handed to dispatcher");
    }
    append_set_cookies(&mut response, &ctx);
    response
}
