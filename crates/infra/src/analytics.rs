//! Analytics calls made from route handlers.
//!
//! A [`ServerAnalytics`] handle is bound to one request. Every call runs the
//! same build → enrich → identity pipeline as tracked page views and waits
//! for all destinations before returning the delivered event.
//!
//! ```ignore
//! async fn signup(State(state): State<AppState>, Tracked(ctx): Tracked) -> Response {
//!     let analytics = state.collector.analytics(&*ctx);
//!     analytics.identify("u-1", traits).await;
//!     analytics.track("Sign Up", properties).await;
//!     ...
//! }
//! ```

use beacon_events::{AnalyticsEvent, RequestContext};
use serde_json::{Map, Value};

use crate::collector::Collector;

pub struct ServerAnalytics<'a> {
    collector: &'a Collector,
    ctx: &'a dyn RequestContext,
}

impl<'a> ServerAnalytics<'a> {
    pub(crate) fn new(collector: &'a Collector, ctx: &'a dyn RequestContext) -> Self {
        Self { collector, ctx }
    }

    /// Attach `user_id` to the visitor. Later events on this browser carry it
    /// through the user cookie.
    pub async fn identify(
        &self,
        user_id: impl Into<String>,
        traits: Map<String, Value>,
    ) -> AnalyticsEvent {
        let user_id = user_id.into();
        self.collector
            .emit(self.ctx, "identify", move |event| {
                event.user_id = Some(user_id).filter(|id| !id.is_empty());
                event.traits = traits;
            })
            .await
    }

    /// Custom event. The name becomes the event type.
    pub async fn track(&self, name: &str, properties: Map<String, Value>) -> AnalyticsEvent {
        let event_type = if name.is_empty() { "track" } else { name };
        self.collector
            .emit(self.ctx, event_type, move |event| {
                event.properties = properties;
            })
            .await
    }

    /// Page view of the current request URL, optionally named.
    pub async fn page(&self, name: Option<&str>, properties: Map<String, Value>) -> AnalyticsEvent {
        let name = name.filter(|n| !n.is_empty()).map(str::to_string);
        self.collector
            .emit(self.ctx, "page", move |event| {
                if let Some(name) = name {
                    event.extra.insert("name".into(), Value::String(name));
                }
                event.properties = properties;
            })
            .await
    }

    /// Attach the visitor to `group_id`, remembered like `identify`.
    pub async fn group(
        &self,
        group_id: impl Into<String>,
        traits: Map<String, Value>,
    ) -> AnalyticsEvent {
        let group_id = group_id.into();
        self.collector
            .emit(self.ctx, "group", move |event| {
                event.group_id = Some(group_id).filter(|id| !id.is_empty());
                event.traits = traits;
            })
            .await
    }

    /// Forget the remembered user and group. Nothing is delivered.
    pub fn reset(&self) {
        self.collector.identity().forget(self.ctx);
    }
}
