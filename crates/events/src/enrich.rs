//! Enrichment hook.
//!
//! A hook wraps the built-in enrichment instead of replacing it: it receives
//! a [`Previous`] continuation and decides whether (and when) the default
//! step runs. Not calling `previous.run(..)` skips the defaults entirely.
//!
//! ```ignore
//! struct Plan;
//!
//! #[async_trait]
//! impl Enricher for Plan {
//!     async fn enrich(
//!         &self,
//!         event: &mut AnalyticsEvent,
//!         ctx: &dyn RequestContext,
//!         previous: Previous<'_>,
//!     ) -> Result<(), EnrichError> {
//!         previous.run(event);
//!         event.properties.insert("plan".into(), "pro".into());
//!         Ok(())
//!     }
//! }
//! ```

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::event::AnalyticsEvent;
use crate::request::RequestContext;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("enrichment failed: {0}")]
    Failed(String),

    #[error("enrichment produced an invalid event: {0}")]
    InvalidEvent(#[from] serde_json::Error),
}

impl EnrichError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Hook run on every event before delivery.
///
/// `ctx` stands in for both the raw request and the raw response: the hook
/// reads headers, cookies and the public URL from it, and its only way to
/// write to the response is queueing cookies (`set_cookie`/`clear_cookie`).
/// Status, body and other response headers belong to the host handler.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(
        &self,
        event: &mut AnalyticsEvent,
        ctx: &dyn RequestContext,
        previous: Previous<'_>,
    ) -> Result<(), EnrichError>;
}

/// Continuation that applies the default enrichment step.
pub struct Previous<'a> {
    default: &'a DefaultEnricher,
    ctx: &'a dyn RequestContext,
}

impl Previous<'_> {
    pub fn run(&self, event: &mut AnalyticsEvent) {
        self.default.apply(event, self.ctx);
    }
}

/// Geo headers set by the edge, deployment tagging and the matched route.
#[derive(Debug, Clone, Default)]
pub struct DefaultEnricher {
    environment: Option<String>,
    deploy_id: Option<String>,
}

impl DefaultEnricher {
    pub fn new(environment: Option<String>, deploy_id: Option<String>) -> Self {
        Self {
            environment: environment.filter(|v| !v.is_empty()),
            deploy_id: deploy_id.filter(|v| !v.is_empty()),
        }
    }

    /// `BEACON_ENV` / `BEACON_DEPLOY_ID`, falling back to the Vercel build
    /// variables when running there.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let on_vercel = lookup("VERCEL").is_some_and(|v| !v.is_empty());
        let pick = |own: &str, vercel: &str| {
            lookup(own)
                .filter(|v| !v.is_empty())
                .or_else(|| on_vercel.then(|| lookup(vercel)).flatten())
        };
        Self::new(
            pick("BEACON_ENV", "VERCEL_ENV"),
            pick("BEACON_DEPLOY_ID", "VERCEL_GIT_COMMIT_SHA"),
        )
    }

    pub fn apply(&self, event: &mut AnalyticsEvent, ctx: &dyn RequestContext) {
        let header = |name: &str| {
            ctx.header(name)
                .map(decode_header)
                .filter(|value| !value.is_empty())
        };

        let geo = &mut event.context.geo;
        geo.country = header("x-vercel-ip-country")
            .or_else(|| header("cf-ipcountry"))
            .or(geo.country.take());
        geo.region = header("x-vercel-ip-country-region").or(geo.region.take());
        geo.city = header("x-vercel-ip-city").or(geo.city.take());
        geo.timezone = header("x-vercel-ip-timezone").or(geo.timezone.take());
        geo.latitude = header("x-vercel-ip-latitude").or(geo.latitude.take());
        geo.longitude = header("x-vercel-ip-longitude").or(geo.longitude.take());

        if let Some(matched) = header("x-matched-path") {
            event.context.page.matched_path = Some(matched);
        }

        if let Some(environment) = &self.environment {
            event
                .properties
                .insert("environment".to_string(), Value::from(environment.as_str()));
        }
        if let Some(deploy_id) = &self.deploy_id {
            event
                .properties
                .insert("deployId".to_string(), Value::from(deploy_id.as_str()));
        }
    }
}

fn decode_header(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[async_trait]
impl Enricher for DefaultEnricher {
    async fn enrich(
        &self,
        event: &mut AnalyticsEvent,
        ctx: &dyn RequestContext,
        _previous: Previous<'_>,
    ) -> Result<(), EnrichError> {
        self.apply(event, ctx);
        Ok(())
    }
}

/// Runs the default step, then deep-merges a static overlay over the event.
#[derive(Debug, Clone)]
pub struct PropertiesEnricher {
    overlay: Value,
}

impl PropertiesEnricher {
    pub fn new(overlay: Value) -> Self {
        Self { overlay }
    }
}

#[async_trait]
impl Enricher for PropertiesEnricher {
    async fn enrich(
        &self,
        event: &mut AnalyticsEvent,
        _ctx: &dyn RequestContext,
        previous: Previous<'_>,
    ) -> Result<(), EnrichError> {
        previous.run(event);
        event.merge(self.overlay.clone())?;
        Ok(())
    }
}

/// Await the hook. Errors and panics are logged and swallowed; the event
/// keeps whatever the hook did before failing.
pub async fn run_enrichment(
    hook: &dyn Enricher,
    default: &DefaultEnricher,
    event: &mut AnalyticsEvent,
    ctx: &dyn RequestContext,
) {
    let previous = Previous { default, ctx };
    let outcome = AssertUnwindSafe(hook.enrich(event, ctx, previous))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(
                message_id = %event.message_id,
                error = %error,
                "enrichment failed, continuing with the event as built"
            );
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(
                message_id = %event.message_id,
                panic = %reason,
                "enrichment panicked, continuing with the event as built"
            );
        }
    }
}
