use std::collections::BTreeMap;

use beacon_core::json::deep_merge;
use beacon_core::{AnonymousId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::user_agent::UserAgentInfo;

/// The canonical analytics event forwarded to destinations.
///
/// Known fields are typed; anything else a client submits lands in `extra`
/// and is serialized back at the top level. Because deserialization routes
/// canonical keys to their fields first, `extra` can never shadow them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    /// Classification string (`page_view`, `track`, `identify`, ...).
    #[serde(rename = "type")]
    pub event_type: String,
    pub message_id: MessageId,
    pub anonymous_id: AnonymousId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_ip: Option<String>,
    #[serde(default)]
    pub context: EventContext,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub traits: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wire shape a destination should use for an event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventKind {
    Page,
    Screen,
    Track,
    Identify,
    Group,
    Alias,
}

impl EventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type.to_ascii_lowercase().as_str() {
            "page" | "page_view" | "pageview" => EventKind::Page,
            "screen" => EventKind::Screen,
            "identify" => EventKind::Identify,
            "group" => EventKind::Group,
            "alias" => EventKind::Alias,
            _ => EventKind::Track,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Page => "page",
            EventKind::Screen => "screen",
            EventKind::Track => "track",
            EventKind::Identify => "identify",
            EventKind::Group => "group",
            EventKind::Alias => "alias",
        }
    }
}

impl AnalyticsEvent {
    /// Fresh event: new message id, `timestamp == sent_at == now`.
    pub fn new(event_type: impl Into<String>, anonymous_id: AnonymousId) -> Self {
        let now = Utc::now();
        Self {
            event_type: event_type.into(),
            message_id: MessageId::generate(),
            anonymous_id,
            user_id: None,
            group_id: None,
            timestamp: now,
            sent_at: now,
            received_at: None,
            request_ip: None,
            context: EventContext::default(),
            properties: Map::new(),
            traits: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_type(&self.event_type)
    }

    /// Deep-merge `overlay` over this event.
    ///
    /// Overlay scalars win, keys only present on the event survive, nulls in
    /// the overlay are ignored. On error the event is left untouched.
    pub fn merge(&mut self, overlay: Value) -> Result<(), serde_json::Error> {
        let mut merged = serde_json::to_value(&*self)?;
        deep_merge(&mut merged, overlay);
        let mut merged: AnalyticsEvent = serde_json::from_value(merged)?;
        merged.normalize_identity();
        *self = merged;
        Ok(())
    }

    /// Empty identities mean "unknown".
    fn normalize_identity(&mut self) {
        if self.user_id.as_deref().is_some_and(str::is_empty) {
            self.user_id = None;
        }
        if self.group_id.as_deref().is_some_and(str::is_empty) {
            self.group_id = None;
        }
    }

    /// Event as a JSON object.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    #[serde(default)]
    pub page: PageContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent_info: Option<UserAgentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "GeoContext::is_empty")]
    pub geo: GeoContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<Library>,
    /// `utm_*` parameters, keys lowercased.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub campaign: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub click_ids: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referring_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Route pattern the hosting framework matched, e.g. `/blog/[slug]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<String>,
}

impl GeoContext {
    pub fn is_empty(&self) -> bool {
        self == &GeoContext::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    pub version: String,
}

impl Library {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::new("beacon", env!("CARGO_PKG_VERSION"))
    }
}
