use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::json::remove_suffix;
use beacon_core::{ConfigError, ConfigResult};
use beacon_events::{AnalyticsEvent, EventKind, RequestContext};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::{Destination, DestinationError, FactoryContext};
use crate::remote::{RemoteRequest, remote_call};

const DEFAULT_API_BASE: &str = "https://plausible.io";
/// Plausible drops events without a forwarded address.
const FALLBACK_IP: &str = "127.1.1.1";

pub fn factory(options: &Value, ctx: &FactoryContext) -> ConfigResult<Arc<dyn Destination>> {
    Ok(Arc::new(PlausibleDestination::from_options(options, ctx)?))
}

/// Plausible events API. Identity calls have no equivalent there and are
/// dropped silently.
#[derive(Debug, Clone)]
pub struct PlausibleDestination {
    domain: String,
    api_base: String,
    client: Client,
    timeout: Duration,
}

impl PlausibleDestination {
    pub fn from_options(options: &Value, ctx: &FactoryContext) -> ConfigResult<Self> {
        let domain = ctx
            .option_or_env(options, "domain", "PLAUSIBLE_DOMAIN")
            .ok_or_else(|| ConfigError::missing_credential("plausible", "domain", "PLAUSIBLE_DOMAIN"))?;
        let api_base = ctx
            .option_or_env(options, "apiBase", "PLAUSIBLE_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            domain,
            api_base: remove_suffix(&api_base, &["/"]).to_string(),
            client: ctx.client.clone(),
            timeout: ctx.timeout,
        })
    }

    fn payload(&self, event: &AnalyticsEvent) -> Value {
        let name = match event.kind() {
            EventKind::Page => "pageview",
            _ => event.event_type.as_str(),
        };
        json!({
            "domain": self.domain,
            "name": name,
            "url": event.context.page.url,
            "referrer": event.context.page.referrer,
            "props": event.properties,
            "revenue": event.properties.get("revenue"),
        })
    }
}

#[async_trait]
impl Destination for PlausibleDestination {
    async fn send(
        &self,
        event: &AnalyticsEvent,
        _ctx: &dyn RequestContext,
    ) -> Result<(), DestinationError> {
        if matches!(
            event.kind(),
            EventKind::Identify | EventKind::Group | EventKind::Alias
        ) {
            return Ok(());
        }

        let forwarded_for = event
            .context
            .ip
            .as_deref()
            .or(event.request_ip.as_deref())
            .unwrap_or(FALLBACK_IP);
        let user_agent = event.context.user_agent.as_deref().unwrap_or_default();

        let request = RemoteRequest::post(self.payload(event))
            .with_header("X-Forwarded-For", forwarded_for)
            .with_header("User-Agent", user_agent)
            .with_timeout(self.timeout)
            .ignore_body();

        let url = format!("{}/api/event", self.api_base);
        remote_call(&self.client, &url, request).await?;
        debug!(destination = %self.describe(), message_id = %event.message_id, "event delivered");
        Ok(())
    }

    fn destination_type(&self) -> &str {
        "plausible"
    }

    fn describe(&self) -> String {
        format!("Plausible @ {}", self.domain)
    }
}
