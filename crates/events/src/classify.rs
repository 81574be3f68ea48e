//! Path → event type classification.

use beacon_core::{ConfigResult, PrefixMap, ShortCircuit};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::request::RequestContext;

pub const SKIP_SENTINEL: &str = "$skip";

/// Outcome of a classification rule.
///
/// In configuration: a string names the event type, `null` defers to the
/// fallback type and `"$skip"` means never track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Resolution {
    Event(String),
    Default,
    Skip,
}

impl From<Option<String>> for Resolution {
    fn from(value: Option<String>) -> Self {
        match value {
            None => Resolution::Default,
            Some(value) if value == SKIP_SENTINEL => Resolution::Skip,
            Some(value) => Resolution::Event(value),
        }
    }
}

impl From<Resolution> for Option<String> {
    fn from(value: Resolution) -> Self {
        match value {
            Resolution::Event(event_type) => Some(event_type),
            Resolution::Default => None,
            Resolution::Skip => Some(SKIP_SENTINEL.to_string()),
        }
    }
}

impl ShortCircuit for Resolution {
    fn short_circuits(&self) -> bool {
        matches!(self, Resolution::Skip)
    }
}

/// Skip rules for framework internals and static files.
pub fn asset_rules() -> Vec<(String, Resolution)> {
    let prefixes = ["/_next*", "/static*", "/favicon.ico"];
    let suffixes = [
        "*.js", "*.css", "*.map", "*.ico", "*.png", "*.jpg", "*.jpeg", "*.gif", "*.svg", "*.webp",
        "*.woff", "*.woff2", "*.txt", "*.xml",
    ];
    prefixes
        .into_iter()
        .chain(suffixes)
        .map(|pattern| (pattern.to_string(), Resolution::Skip))
        .collect()
}

#[derive(Debug, Clone)]
pub struct EventClassifier {
    rules: PrefixMap<Resolution>,
    fallback: Option<String>,
}

impl EventClassifier {
    /// `fallback` applies to `null` rules and unmatched paths; `None` leaves
    /// those untracked.
    pub fn new<P: AsRef<str>>(
        rules: impl IntoIterator<Item = (P, Resolution)>,
        fallback: Option<String>,
    ) -> ConfigResult<Self> {
        Ok(Self {
            rules: PrefixMap::new(rules)?,
            fallback: fallback.filter(|f| !f.is_empty()),
        })
    }

    /// Event type for `path`, or `None` when the request must not be tracked.
    pub fn classify(&self, path: &str) -> Option<String> {
        let resolved = match self.rules.get(path) {
            Some(Resolution::Skip) => None,
            Some(Resolution::Event(event_type)) => Some(event_type.clone()),
            Some(Resolution::Default) | None => self.fallback.clone(),
        };
        debug!(path = %path, event_type = ?resolved, "classified request");
        resolved
    }
}

/// Speculative loads issued by browsers and client-side routers.
pub fn is_prefetch(ctx: &dyn RequestContext) -> bool {
    let says_prefetch = |name: &str| {
        ctx.header(name)
            .is_some_and(|value| value.to_ascii_lowercase().contains("prefetch"))
    };
    says_prefetch("purpose")
        || says_prefetch("sec-purpose")
        || says_prefetch("x-purpose")
        || ctx.header("next-router-prefetch").is_some()
        || ctx.header("x-middleware-prefetch").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::HttpRequestContext;

    #[test]
    fn resolution_reads_string_null_and_skip() {
        let rules: Vec<(String, Resolution)> =
            serde_json::from_str(r#"[["/api*", "api_call"], ["/about", null], ["*.svg", "$skip"]]"#)
                .unwrap();
        assert_eq!(rules[0].1, Resolution::Event("api_call".into()));
        assert_eq!(rules[1].1, Resolution::Default);
        assert_eq!(rules[2].1, Resolution::Skip);
    }

    #[test]
    fn classifies_with_rules_and_fallback() {
        let classifier = EventClassifier::new(
            [
                ("/api*", Resolution::Event("api_call".into())),
                ("/about", Resolution::Default),
                ("/internal*", Resolution::Skip),
            ],
            Some("page_view".into()),
        )
        .unwrap();

        assert_eq!(classifier.classify("/api/users").as_deref(), Some("api_call"));
        assert_eq!(classifier.classify("/about").as_deref(), Some("page_view"));
        assert_eq!(classifier.classify("/pricing").as_deref(), Some("page_view"));
        assert_eq!(classifier.classify("/internal/health"), None);
    }

    #[test]
    fn no_fallback_means_unmatched_paths_are_untracked() {
        let classifier =
            EventClassifier::new([("/checkout*", Resolution::Event("checkout".into()))], None)
                .unwrap();
        assert_eq!(classifier.classify("/"), None);
        assert_eq!(classifier.classify("/checkout/pay").as_deref(), Some("checkout"));
    }

    #[test]
    fn asset_rules_skip_before_catch_all() {
        let mut rules = asset_rules();
        rules.push(("/*".into(), Resolution::Event("page_view".into())));
        let classifier = EventClassifier::new(rules, None).unwrap();
        assert_eq!(classifier.classify("/logo.svg"), None);
        assert_eq!(classifier.classify("/_next/data/build.json"), None);
        assert_eq!(classifier.classify("/blog/post-1").as_deref(), Some("page_view"));
    }

    #[test]
    fn invalid_pattern_fails_construction() {
        assert!(EventClassifier::new([("/a*b", Resolution::Skip)], None).is_err());
    }

    #[test]
    fn detects_prefetch_headers() {
        let prefetch = http::Request::builder()
            .uri("/")
            .header("sec-purpose", "prefetch;prerender")
            .body(())
            .unwrap();
        let router = http::Request::builder()
            .uri("/")
            .header("next-router-prefetch", "1")
            .body(())
            .unwrap();
        let normal = http::Request::builder().uri("/").body(()).unwrap();

        assert!(is_prefetch(&HttpRequestContext::from_request(&prefetch, None)));
        assert!(is_prefetch(&HttpRequestContext::from_request(&router, None)));
        assert!(!is_prefetch(&HttpRequestContext::from_request(&normal, None)));
    }
}
