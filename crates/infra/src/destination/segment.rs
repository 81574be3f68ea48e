//! Segment-compatible HTTP tracking APIs (Segment, Jitsu, RudderStack).
//!
//! Every event is POSTed to `<apiBase>/<kind>` with HTTP Basic auth where the
//! write key is the username and the password is empty.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use beacon_core::json::remove_suffix;
use beacon_core::{ConfigError, ConfigResult};
use beacon_events::{AnalyticsEvent, EventKind, RequestContext};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{Destination, DestinationError, DestinationFactory, FactoryContext};
use crate::remote::{RemoteRequest, remote_call};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFlavor {
    Segment,
    Jitsu,
    RudderStack,
}

impl SegmentFlavor {
    pub fn type_name(&self) -> &'static str {
        match self {
            SegmentFlavor::Segment => "segment",
            SegmentFlavor::Jitsu => "jitsu",
            SegmentFlavor::RudderStack => "rudderstack",
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            SegmentFlavor::Segment => "Segment",
            SegmentFlavor::Jitsu => "Jitsu",
            SegmentFlavor::RudderStack => "RudderStack",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            SegmentFlavor::Segment => "SEGMENT",
            SegmentFlavor::Jitsu => "JITSU",
            SegmentFlavor::RudderStack => "RUDDERSTACK",
        }
    }

    /// Only Segment has a well-known public endpoint.
    fn default_api_base(&self) -> Option<&'static str> {
        match self {
            SegmentFlavor::Segment => Some("https://api.segment.io/v1"),
            SegmentFlavor::Jitsu | SegmentFlavor::RudderStack => None,
        }
    }
}

pub fn factory(flavor: SegmentFlavor) -> impl DestinationFactory {
    move |options: &Value, ctx: &FactoryContext| -> ConfigResult<Arc<dyn Destination>> {
        Ok(Arc::new(SegmentDestination::from_options(flavor, options, ctx)?))
    }
}

#[derive(Debug, Clone)]
pub struct SegmentDestination {
    flavor: SegmentFlavor,
    api_base: String,
    write_key: String,
    client: Client,
    timeout: Duration,
}

impl SegmentDestination {
    /// Options `apiBase` / `writeKey`, falling back to `<PREFIX>_API_BASE` /
    /// `<PREFIX>_WRITE_KEY`.
    pub fn from_options(
        flavor: SegmentFlavor,
        options: &Value,
        ctx: &FactoryContext,
    ) -> ConfigResult<Self> {
        let prefix = flavor.env_prefix();
        let api_base_var = format!("{prefix}_API_BASE");
        let write_key_var = format!("{prefix}_WRITE_KEY");

        let write_key = ctx
            .option_or_env(options, "writeKey", &write_key_var)
            .ok_or_else(|| {
                ConfigError::missing_credential(flavor.type_name(), "writeKey", &write_key_var)
            })?;
        let api_base = ctx
            .option_or_env(options, "apiBase", &api_base_var)
            .or_else(|| flavor.default_api_base().map(str::to_string))
            .ok_or_else(|| {
                ConfigError::missing_credential(flavor.type_name(), "apiBase", &api_base_var)
            })?;

        Ok(Self {
            flavor,
            api_base: normalize_api_base(&api_base),
            write_key,
            client: ctx.client.clone(),
            timeout: ctx.timeout,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn authorization(&self) -> String {
        format!("Basic {}", BASE64.encode(format!("{}:", self.write_key)))
    }
}

#[async_trait]
impl Destination for SegmentDestination {
    async fn send(
        &self,
        event: &AnalyticsEvent,
        _ctx: &dyn RequestContext,
    ) -> Result<(), DestinationError> {
        let kind = event.kind();
        let url = format!("{}/{}", self.api_base, kind.as_str());
        let request = RemoteRequest::post(segment_payload(event))
            .with_header("Authorization", self.authorization())
            .with_timeout(self.timeout);

        remote_call(&self.client, &url, request).await?;
        debug!(destination = %self.describe(), message_id = %event.message_id, "event delivered");
        Ok(())
    }

    fn destination_type(&self) -> &str {
        self.flavor.type_name()
    }

    fn describe(&self) -> String {
        format!(
            "{} @ {} (key: {})",
            self.flavor.display_name(),
            self.api_base,
            mask_write_key(&self.write_key)
        )
    }
}

/// Event JSON in the segment wire shape: `type` is the call kind, track
/// calls carry the event name in `event`, page calls a `name`.
pub fn segment_payload(event: &AnalyticsEvent) -> Value {
    let mut body = event.to_json();
    let kind = event.kind();
    if let Value::Object(map) = &mut body {
        map.insert("type".into(), Value::from(kind.as_str()));
        match kind {
            EventKind::Track => {
                map.insert("event".into(), Value::from(event.event_type.as_str()));
            }
            EventKind::Page | EventKind::Screen => {
                let page = &event.context.page;
                if let Some(name) = page.title.as_deref().or(page.path.as_deref()) {
                    map.entry("name").or_insert_with(|| Value::from(name));
                }
            }
            _ => {}
        }
    }
    body
}

/// Strip trailing slashes and add `https://` when no scheme was given.
pub fn normalize_api_base(api_base: &str) -> String {
    let trimmed = remove_suffix(api_base.trim(), &["/"]);
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Keep a few leading and trailing characters so keys can be told apart in logs.
pub fn mask_write_key(write_key: &str) -> String {
    let chars: Vec<char> = write_key.chars().collect();
    let keep = match chars.len() {
        0..5 => return "***".to_string(),
        5..8 => 1,
        8..11 => 2,
        _ => 3,
    };
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{head}***{tail}")
}
