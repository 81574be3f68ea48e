use serde::{Deserialize, Serialize};

use beacon_events::AnalyticsEvent;

// -------------------------
// Request DTOs
// -------------------------

/// Query of the debug endpoint. Without `type` the path is classified the
/// way a page request to it would be.
#[derive(Debug, Default, Deserialize)]
pub struct DebugQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub path: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct CollectResponse {
    pub ok: bool,
}

impl CollectResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

#[derive(Debug, Serialize)]
pub struct DebugResponse {
    pub ok: bool,
    /// `false` when the path would not produce an event.
    pub tracked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<AnalyticsEvent>,
}
