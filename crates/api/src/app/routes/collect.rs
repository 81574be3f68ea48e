use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use beacon_events::RequestContext;
use serde_json::Value;

use crate::app::dto::CollectResponse;
use crate::app::errors::{collect_error_to_response, json_error};
use crate::app::AppState;
use crate::context::{append_set_cookies, Tracked};

/// `POST <api_route>` with `{ "event": {...} }`. Waits until every
/// destination settled; delivery failures are logged, not reported.
pub async fn collect(
    State(state): State<AppState>,
    Tracked(ctx): Tracked,
    body: Bytes,
) -> Response {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "malformed_request",
                format!("body is not valid JSON: {e}"),
            );
        }
    };

    let shared: Arc<dyn RequestContext> = ctx.clone();
    let mut response = match state.collector.collect(shared, body).await {
        Ok(_) => Json(CollectResponse::ok()).into_response(),
        Err(e) => {
            if !e.is_client_error() {
                tracing::error!(error = %e, "failed to process collect request");
            }
            collect_error_to_response(&e)
        }
    };
    append_set_cookies(&mut response, &ctx);
    response
}
