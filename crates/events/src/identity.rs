//! Cookie-backed identity: anonymous id plus remembered user/group ids.

use std::net::IpAddr;

use beacon_core::AnonymousId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::{AnalyticsEvent, EventKind};
use crate::request::RequestContext;
use crate::url::primary_domain;

pub const DEFAULT_COOKIE_NAME: &str = "bc_id";
pub const DEFAULT_USER_COOKIE_NAME: &str = "bc_user";
pub const DEFAULT_GROUP_COOKIE_NAME: &str = "bc_group";

/// JSON payload of the user and group cookies.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    cookie_name: String,
    user_cookie_name: String,
    group_cookie_name: String,
    cookie_domain: Option<String>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_COOKIE_NAME)
    }
}

impl IdentityResolver {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            user_cookie_name: DEFAULT_USER_COOKIE_NAME.to_string(),
            group_cookie_name: DEFAULT_GROUP_COOKIE_NAME.to_string(),
            cookie_domain: None,
        }
    }

    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain.filter(|d| !d.is_empty());
        self
    }

    pub fn with_user_cookie(mut self, name: impl Into<String>) -> Self {
        self.user_cookie_name = name.into();
        self
    }

    pub fn with_group_cookie(mut self, name: impl Into<String>) -> Self {
        self.group_cookie_name = name.into();
        self
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Existing cookie value as-is, or a new id that is also queued as a
    /// `Set-Cookie`. Calling twice in one request yields the same id.
    pub fn resolve_anonymous_id(&self, ctx: &dyn RequestContext) -> AnonymousId {
        if let Some(existing) = ctx.cookie(&self.cookie_name).filter(|v| !v.is_empty()) {
            return AnonymousId::new(existing);
        }

        let id = AnonymousId::generate();
        debug!(anonymous_id = %id, cookie = %self.cookie_name, "generated anonymous id");
        let domain = self.cookie_domain(ctx);
        ctx.set_cookie(&self.cookie_name, id.as_str(), domain.as_deref());
        id
    }

    /// Configured domain, else the registrable domain of the request host.
    /// Bare hosts (`localhost`) and IP literals get no domain attribute.
    pub fn cookie_domain(&self, ctx: &dyn RequestContext) -> Option<String> {
        if let Some(domain) = &self.cookie_domain {
            return Some(domain.clone());
        }
        let host = &ctx.public_url().host;
        let is_ip = host.trim_matches(['[', ']']).parse::<IpAddr>().is_ok();
        if is_ip || !host.contains('.') {
            return None;
        }
        Some(primary_domain(host))
    }

    /// Persist identity carried by identify/group events, then fill missing
    /// `user_id`/`group_id` from the identity cookies.
    pub fn recall(&self, event: &mut AnalyticsEvent, ctx: &dyn RequestContext) {
        let domain = self.cookie_domain(ctx);
        match (event.kind(), &event.user_id, &event.group_id) {
            (EventKind::Identify, Some(user_id), _) => {
                let payload = PersistedIdentity {
                    user_id: Some(user_id.clone()),
                    group_id: None,
                };
                self.persist(ctx, &self.user_cookie_name, &payload, domain.as_deref());
            }
            (EventKind::Group, _, Some(group_id)) => {
                let payload = PersistedIdentity {
                    user_id: None,
                    group_id: Some(group_id.clone()),
                };
                self.persist(ctx, &self.group_cookie_name, &payload, domain.as_deref());
            }
            _ => {}
        }

        if event.user_id.is_none() {
            event.user_id = self
                .load(ctx, &self.user_cookie_name)
                .and_then(|stored| stored.user_id)
                .filter(|id| !id.is_empty());
        }
        if event.group_id.is_none() {
            event.group_id = self
                .load(ctx, &self.group_cookie_name)
                .and_then(|stored| stored.group_id)
                .filter(|id| !id.is_empty());
        }
    }

    /// Drop the remembered user and group. The anonymous id stays.
    pub fn forget(&self, ctx: &dyn RequestContext) {
        let domain = self.cookie_domain(ctx);
        ctx.clear_cookie(&self.user_cookie_name, domain.as_deref());
        ctx.clear_cookie(&self.group_cookie_name, domain.as_deref());
        debug!("cleared identity cookies");
    }

    fn persist(
        &self,
        ctx: &dyn RequestContext,
        cookie: &str,
        payload: &PersistedIdentity,
        domain: Option<&str>,
    ) {
        match serde_json::to_string(payload) {
            Ok(json) => ctx.set_cookie(cookie, &json, domain),
            Err(error) => warn!(cookie = %cookie, error = %error, "failed to encode identity cookie"),
        }
    }

    fn load(&self, ctx: &dyn RequestContext, cookie: &str) -> Option<PersistedIdentity> {
        let raw = ctx.cookie(cookie)?;
        match serde_json::from_str(&raw) {
            Ok(stored) => Some(stored),
            Err(error) => {
                warn!(cookie = %cookie, error = %error, "ignoring unreadable identity cookie");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::HttpRequestContext;

    fn ctx(uri: &str, cookie: Option<&str>) -> HttpRequestContext {
        let mut builder = http::Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }
        HttpRequestContext::from_request(&builder.body(()).unwrap(), None)
    }

    #[test]
    fn existing_cookie_is_returned_unchanged() {
        let ctx = ctx("https://app.example.com/", Some("bc_id=odd%20value%21"));
        let resolver = IdentityResolver::default();
        let id = resolver.resolve_anonymous_id(&ctx);
        assert_eq!(id.as_str(), "odd value!");
        assert!(ctx.set_cookie_headers().is_empty());
    }

    #[test]
    fn missing_cookie_generates_once_per_request() {
        let ctx = ctx("https://app.example.com/", None);
        let resolver = IdentityResolver::default();

        let first = resolver.resolve_anonymous_id(&ctx);
        let second = resolver.resolve_anonymous_id(&ctx);

        assert_eq!(first, second);
        let headers = ctx.set_cookie_headers();
        assert_eq!(headers.len(), 1);
        assert!(headers[0].starts_with(&format!("bc_id={first}")));
        assert!(headers[0].contains("Domain=example.com"));
    }

    #[test]
    fn cookie_domain_prefers_configuration() {
        let resolver = IdentityResolver::default().with_cookie_domain(Some("tracking.io".into()));
        assert_eq!(
            resolver.cookie_domain(&ctx("https://a.b.example.com/", None)).as_deref(),
            Some("tracking.io")
        );
    }

    #[test]
    fn cookie_domain_skips_bare_hosts_and_ips() {
        let resolver = IdentityResolver::default();
        assert_eq!(resolver.cookie_domain(&ctx("http://localhost:3000/", None)), None);
        assert_eq!(resolver.cookie_domain(&ctx("http://127.0.0.1/", None)), None);
        assert_eq!(
            resolver
                .cookie_domain(&ctx("https://my-app.vercel.app/", None))
                .as_deref(),
            Some("my-app.vercel.app")
        );
    }

    #[test]
    fn recall_fills_missing_identity_from_cookies() {
        let ctx = ctx(
            "https://example.com/",
            Some("bc_user=%7B%22userId%22%3A%22u-1%22%7D; bc_group=%7B%22groupId%22%3A%22g-9%22%7D"),
        );
        let mut event = AnalyticsEvent::new("page_view", AnonymousId::new("a"));
        IdentityResolver::default().recall(&mut event, &ctx);
        assert_eq!(event.user_id.as_deref(), Some("u-1"));
        assert_eq!(event.group_id.as_deref(), Some("g-9"));
    }

    #[test]
    fn recall_keeps_explicit_identity() {
        let ctx = ctx("https://example.com/", Some("bc_user=%7B%22userId%22%3A%22old%22%7D"));
        let mut event = AnalyticsEvent::new("track", AnonymousId::new("a"));
        event.user_id = Some("new".into());
        IdentityResolver::default().recall(&mut event, &ctx);
        assert_eq!(event.user_id.as_deref(), Some("new"));
    }

    #[test]
    fn identify_and_group_events_persist_identity() {
        let ctx = ctx("https://example.com/", None);
        let resolver = IdentityResolver::default();

        let mut identify = AnalyticsEvent::new("identify", AnonymousId::new("a"));
        identify.user_id = Some("u-7".into());
        resolver.recall(&mut identify, &ctx);

        let mut group = AnalyticsEvent::new("group", AnonymousId::new("a"));
        group.group_id = Some("g-3".into());
        resolver.recall(&mut group, &ctx);

        // A later event on the same request sees both.
        let mut page = AnalyticsEvent::new("page_view", AnonymousId::new("a"));
        resolver.recall(&mut page, &ctx);
        assert_eq!(page.user_id.as_deref(), Some("u-7"));
        assert_eq!(page.group_id.as_deref(), Some("g-3"));
        assert_eq!(ctx.set_cookie_headers().len(), 2);
    }

    #[test]
    fn forget_clears_user_and_group_but_keeps_anonymous_id() {
        let ctx = ctx(
            "https://example.com/",
            Some("bc_id=anon-1; bc_user=%7B%22userId%22%3A%22u-1%22%7D; bc_group=%7B%22groupId%22%3A%22g-1%22%7D"),
        );
        let resolver = IdentityResolver::default();
        resolver.forget(&ctx);

        let mut event = AnalyticsEvent::new("page_view", resolver.resolve_anonymous_id(&ctx));
        resolver.recall(&mut event, &ctx);
        assert_eq!(event.anonymous_id.as_str(), "anon-1");
        assert!(event.user_id.is_none());
        assert!(event.group_id.is_none());

        let headers = ctx.set_cookie_headers();
        assert_eq!(headers.len(), 2);
        assert!(headers.iter().all(|h| h.contains("Max-Age=0")));
    }

    #[test]
    fn unreadable_cookie_means_no_prior_identity() {
        let ctx = ctx("https://example.com/", Some("bc_user=not-json"));
        let mut event = AnalyticsEvent::new("page_view", AnonymousId::new("a"));
        IdentityResolver::default().recall(&mut event, &ctx);
        assert!(event.user_id.is_none());
    }
}
