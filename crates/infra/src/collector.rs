//! The collection pipeline: classify → build → enrich → identity → dispatch.
//!
//! A [`Collector`] is assembled once at startup and shared behind an `Arc`.
//! It has three entry points:
//! - [`Collector::track`] for page requests, fire-and-forget,
//! - [`Collector::collect`] for client-submitted events, waits for delivery,
//! - [`Collector::debug`] which builds the event without delivering it,
//! - [`Collector::analytics`] for calls made by route handlers, waits for
//!   delivery.

use std::sync::Arc;

use beacon_core::AnonymousId;
use beacon_events::builder::client_ip;
use beacon_events::{
    AnalyticsEvent, DefaultEnricher, Enricher, EventBuilder, EventClassifier, IdentityResolver,
    PublicUrl, RequestContext, is_prefetch, run_enrichment,
};
use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::analytics::ServerAnalytics;
use crate::dispatcher::{DispatchReport, Dispatcher};

#[derive(Debug, Error)]
pub enum CollectError {
    /// The client sent something unusable. Maps to a 4xx.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Processing failed on our side. Maps to a 5xx.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CollectError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, CollectError::Malformed(_))
    }
}

pub struct Collector {
    classifier: EventClassifier,
    identity: IdentityResolver,
    builder: EventBuilder,
    enricher: Arc<dyn Enricher>,
    defaults: DefaultEnricher,
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("classifier", &self.classifier)
            .field("identity", &self.identity)
            .field("defaults", &self.defaults)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// Default identity cookies, builder and enrichment.
    pub fn new(classifier: EventClassifier, dispatcher: Dispatcher) -> Self {
        let defaults = DefaultEnricher::default();
        Self {
            classifier,
            identity: IdentityResolver::default(),
            builder: EventBuilder::default(),
            enricher: Arc::new(defaults.clone()),
            defaults,
            dispatcher,
        }
    }

    pub fn with_identity(mut self, identity: IdentityResolver) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_builder(mut self, builder: EventBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Replace the enrichment hook. The hook reaches the built-in step
    /// through [`Previous`](beacon_events::Previous).
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = enricher;
        self
    }

    /// Built-in enrichment step handed to the hook as `previous`.
    pub fn with_default_enricher(mut self, defaults: DefaultEnricher) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    /// Event type a page request to `path` would be tracked as.
    pub fn classify(&self, path: &str) -> Option<String> {
        self.classifier.classify(path)
    }

    /// Track the page request behind `ctx`. Returns once the event is built
    /// and enriched; delivery continues on the returned task.
    ///
    /// `None` when the request is a prefetch or its path is not tracked.
    pub async fn track(&self, ctx: Arc<dyn RequestContext>) -> Option<JoinHandle<DispatchReport>> {
        if is_prefetch(ctx.as_ref()) {
            debug!(path = %ctx.public_url().path, "skipping prefetch request");
            return None;
        }
        let event_type = self.classifier.classify(&ctx.public_url().path)?;
        let url = ctx.public_url().clone();
        let mut event = self.build(&event_type, &url, None, ctx.as_ref());
        self.finish(&mut event, ctx.as_ref()).await;
        Some(self.dispatcher.dispatch_detached(event, ctx))
    }

    /// Process an event submitted by a client-side integration and wait for
    /// every destination to settle.
    ///
    /// `body` is `{ "event": {...} }`; a bare event object is accepted too.
    /// The client event is merged over the server-built one, so client fields
    /// win while server-derived context fills the gaps.
    pub async fn collect(
        &self,
        ctx: Arc<dyn RequestContext>,
        body: Value,
    ) -> Result<AnalyticsEvent, CollectError> {
        let client_event = match body {
            Value::Object(mut body) => match body.remove("event") {
                Some(event) => event,
                None => Value::Object(body),
            },
            _ => return Err(CollectError::malformed("body must be a JSON object")),
        };
        let Value::Object(mut client_event) = client_event else {
            return Err(CollectError::malformed("event must be a JSON object"));
        };
        let message_id = required_str(&client_event, "messageId")?;
        let event_type = required_str(&client_event, "type")?;
        // Anything but a non-empty string falls back to the cookie id.
        let client_anonymous_id = match client_event.remove("anonymousId") {
            Some(Value::String(id)) if !id.is_empty() => Some(AnonymousId::new(id)),
            _ => None,
        };
        let client_event = Value::Object(client_event);

        let url = ctx.public_url().clone();
        let mut event = self.build(&event_type, &url, client_anonymous_id, ctx.as_ref());
        event
            .merge(client_event)
            .map_err(|e| CollectError::malformed(format!("invalid event {message_id}: {e}")))?;
        event.received_at = Some(Utc::now());
        event.request_ip = Some(client_ip(ctx.as_ref()));
        self.finish(&mut event, ctx.as_ref()).await;

        let report = self
            .dispatcher
            .dispatch_detached(event.clone(), ctx)
            .await
            .map_err(|e| CollectError::internal(format!("dispatch of {message_id} failed: {e}")))?;
        debug!(
            message_id = %event.message_id,
            delivered = report.delivered.len(),
            failed = report.failures.len(),
            "collected client event"
        );
        Ok(event)
    }

    /// Build and enrich the event a request to `path` would produce, without
    /// delivering it. `path` may carry a query string.
    pub async fn debug(
        &self,
        ctx: &dyn RequestContext,
        event_type: &str,
        path: Option<&str>,
    ) -> AnalyticsEvent {
        let url = match path {
            Some(path) => with_path_and_query(ctx.public_url(), path),
            None => ctx.public_url().clone(),
        };
        let mut event = self.build(event_type, &url, None, ctx);
        self.finish(&mut event, ctx).await;
        event
    }

    /// Server-side analytics bound to the request behind `ctx`.
    pub fn analytics<'a>(&'a self, ctx: &'a dyn RequestContext) -> ServerAnalytics<'a> {
        ServerAnalytics::new(self, ctx)
    }

    /// Build an event for the current request URL, let `apply` fill in the
    /// call-specific fields, then enrich and deliver to every destination.
    pub(crate) async fn emit(
        &self,
        ctx: &dyn RequestContext,
        event_type: &str,
        apply: impl FnOnce(&mut AnalyticsEvent),
    ) -> AnalyticsEvent {
        let url = ctx.public_url().clone();
        let mut event = self.build(event_type, &url, None, ctx);
        apply(&mut event);
        self.finish(&mut event, ctx).await;

        let report = self.dispatcher.dispatch_all(&event, ctx).await;
        debug!(
            message_id = %event.message_id,
            event_type = %event.event_type,
            delivered = report.delivered.len(),
            failed = report.failures.len(),
            "delivered server event"
        );
        event
    }

    /// Base event. Without a client-supplied id the anonymous id comes from
    /// (or is written to) the identity cookie.
    fn build(
        &self,
        event_type: &str,
        url: &PublicUrl,
        anonymous_id: Option<AnonymousId>,
        ctx: &dyn RequestContext,
    ) -> AnalyticsEvent {
        let anonymous_id =
            anonymous_id.unwrap_or_else(|| self.identity.resolve_anonymous_id(ctx));
        self.builder.build(event_type, url, anonymous_id, ctx)
    }

    /// Enrichment, then identity recall. Both complete before any
    /// destination sees the event.
    async fn finish(&self, event: &mut AnalyticsEvent, ctx: &dyn RequestContext) {
        run_enrichment(self.enricher.as_ref(), &self.defaults, event, ctx).await;
        self.identity.recall(event, ctx);
    }
}

fn required_str(event: &Map<String, Value>, field: &str) -> Result<String, CollectError> {
    event
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CollectError::malformed(format!("{field} is not present in request")))
}

fn with_path_and_query(base: &PublicUrl, path: &str) -> PublicUrl {
    let (path, query) = path.split_once('?').unwrap_or((path, ""));
    base.clone()
        .with_path(path)
        .with_query(PublicUrl::parse_query(query))
}
