use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};

use beacon_events::RequestContext;
use crate::app::dto::{DebugQuery, DebugResponse};
use crate::app::AppState;
use crate::context::{append_set_cookies, Tracked};

/// `GET <api_route>/debug?type=&path=` — the event a request would produce,
/// built and enriched but not delivered.
pub async fn debug(
    State(state): State<AppState>,
    Tracked(ctx): Tracked,
    Query(query): Query<DebugQuery>,
) -> Response {
    // Without `path`, describe this request itself.
    let path = query.path.as_deref().filter(|p| !p.is_empty());
    let route = match path {
        Some(path) => path.split('?').next().unwrap_or(path),
        None => ctx.public_url().path.as_str(),
    };
    let event_type = query
        .event_type
        .filter(|t| !t.is_empty())
        .or_else(|| state.collector.classify(route));

    let body = match event_type {
        Some(event_type) => DebugResponse {
            ok: true,
            tracked: true,
            event: Some(state.collector.debug(&*ctx, &event_type, path).await),
        },
        None => DebugResponse {
            ok: true,
            tracked: false,
            event: None,
        },
    };

    let mut response = Json(body).into_response();
    append_set_cookies(&mut response, &ctx);
    response
}
