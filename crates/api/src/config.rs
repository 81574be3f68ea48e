//! Server settings, read from the environment at startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{ConfigError, ConfigResult};
use beacon_events::classify::{SKIP_SENTINEL, asset_rules};
use beacon_events::identity::DEFAULT_COOKIE_NAME;
use beacon_events::{DefaultEnricher, Enricher, Resolution};
use beacon_infra::remote::DEFAULT_TIMEOUT;
use beacon_infra::{DestinationSpec, Env, ProcessEnv};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_API_ROUTE: &str = "/api/ev";
pub const DEFAULT_FALLBACK_EVENT_TYPE: &str = "page_view";

#[derive(Clone)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    /// Collect endpoint; the debug endpoint lives at `<api_route>/debug`.
    pub api_route: String,
    pub debug_endpoint: bool,
    pub cookie_name: String,
    pub cookie_domain: Option<String>,
    /// Classification rules in priority order. Asset skip rules are added in
    /// front of these when the app is built.
    pub event_types: Vec<(String, Resolution)>,
    /// Event type for unmatched paths and `null` rules. `None` leaves them
    /// untracked.
    pub fallback_event_type: Option<String>,
    /// `None` means "derive from credentials in `env`".
    pub destinations: Option<Vec<Option<DestinationSpec>>>,
    pub remote_timeout: Duration,
    pub defaults: DefaultEnricher,
    pub enricher: Option<Arc<dyn Enricher>>,
    pub env: Arc<dyn Env>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("listen_addr", &self.listen_addr)
            .field("api_route", &self.api_route)
            .field("debug_endpoint", &self.debug_endpoint)
            .field("cookie_name", &self.cookie_name)
            .field("cookie_domain", &self.cookie_domain)
            .field("event_types", &self.event_types)
            .field("fallback_event_type", &self.fallback_event_type)
            .field("destinations", &self.destinations)
            .field("remote_timeout", &self.remote_timeout)
            .field("defaults", &self.defaults)
            .field("custom_enricher", &self.enricher.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            api_route: DEFAULT_API_ROUTE.to_string(),
            debug_endpoint: false,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_domain: None,
            event_types: Vec::new(),
            fallback_event_type: Some(DEFAULT_FALLBACK_EVENT_TYPE.to_string()),
            destinations: None,
            remote_timeout: DEFAULT_TIMEOUT,
            defaults: DefaultEnricher::default(),
            enricher: None,
            env: Arc::new(ProcessEnv),
        }
    }
}

impl Settings {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_source(Arc::new(ProcessEnv))
    }

    /// Read settings from `env`. Malformed JSON lists are errors; other bad
    /// values are logged and replaced by their defaults.
    pub fn from_source(env: Arc<dyn Env>) -> ConfigResult<Self> {
        let defaults = Settings::default();

        let listen_addr = match env.var("BEACON_LISTEN_ADDR") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "invalid BEACON_LISTEN_ADDR; using {DEFAULT_LISTEN_ADDR}");
                defaults.listen_addr
            }),
            None => defaults.listen_addr,
        };

        let remote_timeout = match env.var("BEACON_REMOTE_TIMEOUT_MS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    tracing::warn!(value = %raw, "invalid BEACON_REMOTE_TIMEOUT_MS; using default");
                    defaults.remote_timeout
                }
            },
            None => defaults.remote_timeout,
        };

        let event_types = match env.var("BEACON_EVENT_TYPES") {
            Some(raw) => parse_event_types(&raw)?,
            None => Vec::new(),
        };

        let fallback_event_type = match env.var("BEACON_FALLBACK_EVENT_TYPE") {
            Some(raw) if raw == SKIP_SENTINEL => None,
            Some(raw) => Some(raw),
            None => defaults.fallback_event_type,
        };

        let destinations = env
            .var("BEACON_DESTINATIONS")
            .map(|raw| DestinationSpec::parse_list(&raw))
            .transpose()?;

        let lookup_env = env.clone();
        Ok(Self {
            listen_addr,
            api_route: env
                .var("BEACON_API_ROUTE")
                .map(|route| normalize_route(&route))
                .unwrap_or(defaults.api_route),
            debug_endpoint: env.is_truthy("BEACON_DEBUG_ROUTE"),
            cookie_name: env.var("BEACON_COOKIE_NAME").unwrap_or(defaults.cookie_name),
            cookie_domain: env.var("BEACON_COOKIE_DOMAIN"),
            event_types,
            fallback_event_type,
            destinations,
            remote_timeout,
            defaults: DefaultEnricher::from_lookup(move |key| lookup_env.var(key)),
            enricher: None,
            env,
        })
    }

    pub fn with_api_route(mut self, route: impl AsRef<str>) -> Self {
        self.api_route = normalize_route(route.as_ref());
        self
    }

    pub fn with_debug_endpoint(mut self, enabled: bool) -> Self {
        self.debug_endpoint = enabled;
        self
    }

    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain;
        self
    }

    pub fn with_event_types<P: Into<String>>(
        mut self,
        rules: impl IntoIterator<Item = (P, Resolution)>,
    ) -> Self {
        self.event_types = rules.into_iter().map(|(p, r)| (p.into(), r)).collect();
        self
    }

    pub fn with_fallback_event_type(mut self, fallback: Option<String>) -> Self {
        self.fallback_event_type = fallback;
        self
    }

    pub fn with_destinations(mut self, destinations: Vec<Option<DestinationSpec>>) -> Self {
        self.destinations = Some(destinations);
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn with_defaults(mut self, defaults: DefaultEnricher) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_env(mut self, env: Arc<dyn Env>) -> Self {
        self.env = env;
        self
    }

    pub fn debug_route(&self) -> String {
        format!("{}/debug", self.api_route)
    }

    /// Asset skip rules followed by the configured rules.
    pub fn classification_rules(&self) -> Vec<(String, Resolution)> {
        let mut rules = asset_rules();
        rules.extend(self.event_types.iter().cloned());
        rules
    }

    /// Whether `path` belongs to the collector's own endpoints.
    pub fn is_api_path(&self, path: &str) -> bool {
        path == self.api_route
            || path
                .strip_prefix(self.api_route.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

fn parse_event_types(raw: &str) -> ConfigResult<Vec<(String, Resolution)>> {
    serde_json::from_str(raw).map_err(|e| {
        ConfigError::invalid(format!(
            "BEACON_EVENT_TYPES must be a JSON array of [pattern, type] pairs: {e}"
        ))
    })
}

fn normalize_route(route: &str) -> String {
    let trimmed = route.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
