use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use beacon_infra::CollectError;

pub fn collect_error_to_response(err: &CollectError) -> axum::response::Response {
    match err {
        CollectError::Malformed(msg) => json_error(StatusCode::BAD_REQUEST, "malformed_request", msg),
        CollectError::Internal(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "ok": false,
            "code": code,
            "error": message.into(),
        })),
    )
        .into_response()
}
