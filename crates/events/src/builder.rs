use beacon_core::AnonymousId;

use crate::campaign::{click_ids, utm_params};
use crate::event::{AnalyticsEvent, Library, PageContext};
use crate::request::RequestContext;
use crate::url::{PublicUrl, referring_domain};
use crate::user_agent::UserAgentInfo;

const LOOPBACK: &str = "127.0.0.1";

/// Proxy headers consulted after `x-forwarded-for`, in order.
const IP_HEADERS: &[&str] = &["x-real-ip", "cf-connecting-ip", "true-client-ip"];

/// Assembles the base event from what the request exposes. Delivers nothing.
#[derive(Debug, Clone, Default)]
pub struct EventBuilder {
    library: Library,
}

impl EventBuilder {
    pub fn new(library: Library) -> Self {
        Self { library }
    }

    pub fn build(
        &self,
        event_type: &str,
        url: &PublicUrl,
        anonymous_id: AnonymousId,
        ctx: &dyn RequestContext,
    ) -> AnalyticsEvent {
        let mut event = AnalyticsEvent::new(event_type, anonymous_id);
        let referrer = ctx.header("referer").map(str::to_string);
        let search = url.query_string();

        event.context.page = PageContext {
            url: Some(url.to_url_string()),
            path: Some(url.path.clone()),
            host: Some(url.host_with_port()),
            referring_domain: referrer.as_deref().and_then(referring_domain),
            referrer,
            title: None,
            search: (!search.is_empty()).then_some(search),
            matched_path: None,
        };

        event.context.ip = Some(client_ip(ctx));
        if let Some(user_agent) = ctx.header("user-agent") {
            event.context.user_agent_info = Some(UserAgentInfo::parse(user_agent));
            event.context.user_agent = Some(user_agent.to_string());
        }
        event.context.locale = ctx.header("accept-language").and_then(primary_locale);
        event.context.library = Some(self.library.clone());
        event.context.campaign = utm_params(&url.query);
        event.context.click_ids = click_ids(&url.query);

        event
    }
}

/// Client address: first `x-forwarded-for` entry, then the other proxy
/// headers, then the socket peer, then loopback.
pub fn client_ip(ctx: &dyn RequestContext) -> String {
    let forwarded = ctx
        .header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    IP_HEADERS
        .iter()
        .filter_map(|name| ctx.header(name))
        .map(str::trim)
        .find(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| ctx.peer_ip().map(|ip| ip.to_string()))
        .unwrap_or_else(|| LOOPBACK.to_string())
}

/// First language tag of an `Accept-Language` header, without its weight.
///
/// `en-US,en;q=0.9` → `en-US`.
pub fn primary_locale(accept_language: &str) -> Option<String> {
    accept_language
        .split(',')
        .next()
        .and_then(|tag| tag.split(';').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(str::to_string)
}
