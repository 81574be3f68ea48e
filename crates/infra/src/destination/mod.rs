//! Destinations: where events go.
//!
//! A destination is resolved once, at startup, from a [`DestinationSpec`]
//! through a [`DestinationRegistry`]. After that the registry is dropped and
//! only the `Arc<dyn Destination>` handles remain.

pub mod echo;
pub mod plausible;
pub mod postgrest;
pub mod segment;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{ConfigError, ConfigResult};
use beacon_events::{AnalyticsEvent, RequestContext};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::remote::{DEFAULT_TIMEOUT, RemoteError};

pub use echo::EchoDestination;
pub use plausible::PlausibleDestination;
pub use postgrest::PostgrestDestination;
pub use segment::{SegmentDestination, SegmentFlavor};

#[derive(Debug, Error)]
pub enum DestinationError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("event rejected: {0}")]
    Rejected(String),

    #[error("destination panicked: {0}")]
    Panicked(String),
}

impl DestinationError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// A ready-to-use sink. Holds configuration only, no per-event state.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn send(
        &self,
        event: &AnalyticsEvent,
        ctx: &dyn RequestContext,
    ) -> Result<(), DestinationError>;

    /// Registry key this destination was created from (`segment`, `echo`, ...).
    fn destination_type(&self) -> &str;

    /// Human-readable description for logs. Must not leak credentials.
    fn describe(&self) -> String;
}

/// Environment lookup, injectable for tests.
pub trait Env: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;

    fn is_truthy(&self, key: &str) -> bool {
        self.var(key).is_some_and(|value| {
            matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
        })
    }
}

/// The process environment. Empty variables count as unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl Env for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

impl Env for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Shared inputs for destination factories.
#[derive(Clone)]
pub struct FactoryContext {
    pub client: Client,
    pub env: Arc<dyn Env>,
    pub timeout: Duration,
}

impl FactoryContext {
    pub fn new(client: Client, env: Arc<dyn Env>) -> Self {
        Self {
            client,
            env,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Option value if present and non-empty, else the environment variable.
    pub fn option_or_env(&self, options: &Value, key: &str, env_var: &str) -> Option<String> {
        options
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| self.env.var(env_var))
    }
}

impl std::fmt::Debug for FactoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryContext")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub trait DestinationFactory: Send + Sync {
    fn create(&self, options: &Value, ctx: &FactoryContext) -> ConfigResult<Arc<dyn Destination>>;
}

impl<F> DestinationFactory for F
where
    F: Fn(&Value, &FactoryContext) -> ConfigResult<Arc<dyn Destination>> + Send + Sync,
{
    fn create(&self, options: &Value, ctx: &FactoryContext) -> ConfigResult<Arc<dyn Destination>> {
        self(options, ctx)
    }
}

/// One configured destination: a registry name, or a type plus options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DestinationSpec {
    Name(String),
    Configured {
        #[serde(rename = "type")]
        destination_type: String,
        #[serde(default)]
        options: Value,
    },
}

impl DestinationSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn configured(destination_type: impl Into<String>, options: Value) -> Self {
        Self::Configured {
            destination_type: destination_type.into(),
            options,
        }
    }

    pub fn destination_type(&self) -> &str {
        match self {
            DestinationSpec::Name(name) => name,
            DestinationSpec::Configured {
                destination_type, ..
            } => destination_type,
        }
    }

    /// Parse a JSON list of slots. `null` and `false` leave a slot empty.
    pub fn parse_list(json: &str) -> ConfigResult<Vec<Option<DestinationSpec>>> {
        let slots: Vec<Value> = serde_json::from_str(json)
            .map_err(|e| ConfigError::invalid(format!("destinations must be a JSON array: {e}")))?;
        slots
            .into_iter()
            .map(|slot| match slot {
                Value::Null | Value::Bool(false) => Ok(None),
                other => serde_json::from_value(other.clone()).map(Some).map_err(|e| {
                    ConfigError::invalid(format!("invalid destination entry {other}: {e}"))
                }),
            })
            .collect()
    }
}

/// Name → factory map. Closed once built: add entries with [`with`](Self::with)
/// before calling [`resolve`](Self::resolve).
pub struct DestinationRegistry {
    factories: HashMap<String, Arc<dyn DestinationFactory>>,
}

impl DestinationRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        Self::empty()
            .with("segment", segment::factory(SegmentFlavor::Segment))
            .with("jitsu", segment::factory(SegmentFlavor::Jitsu))
            .with("rudderstack", segment::factory(SegmentFlavor::RudderStack))
            .with("plausible", plausible::factory)
            .with("postgrest", postgrest::factory)
            .with("echo", echo::factory)
    }

    pub fn with(mut self, name: impl Into<String>, factory: impl DestinationFactory + 'static) -> Self {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build live handles in configuration order. Empty slots are skipped;
    /// an unknown name or a factory error fails the whole resolution.
    pub fn resolve(
        &self,
        specs: &[Option<DestinationSpec>],
        ctx: &FactoryContext,
    ) -> ConfigResult<Vec<Arc<dyn Destination>>> {
        let null = Value::Null;
        specs
            .iter()
            .flatten()
            .map(|spec| {
                let (name, options) = match spec {
                    DestinationSpec::Name(name) => (name.as_str(), &null),
                    DestinationSpec::Configured {
                        destination_type,
                        options,
                    } => (destination_type.as_str(), options),
                };
                let factory = self
                    .factories
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownDestination(name.to_string()))?;
                factory.create(options, ctx)
            })
            .collect()
    }
}

impl Default for DestinationRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Destinations enabled purely by credentials being present in `env`.
pub fn self_configured(env: &dyn Env) -> Vec<Option<DestinationSpec>> {
    let has = |key: &str| env.var(key).is_some();
    let slot = |enabled: bool, name: &str| enabled.then(|| DestinationSpec::named(name));
    vec![
        slot(has("SEGMENT_WRITE_KEY"), "segment"),
        slot(has("JITSU_API_BASE") && has("JITSU_WRITE_KEY"), "jitsu"),
        slot(
            has("RUDDERSTACK_API_BASE") && has("RUDDERSTACK_WRITE_KEY"),
            "rudderstack",
        ),
        slot(has("PLAUSIBLE_DOMAIN"), "plausible"),
        slot(has("POSTGREST_URL") && has("POSTGREST_API_KEY"), "postgrest"),
        slot(env.is_truthy("BEACON_ECHO"), "echo"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn factory_ctx(pairs: &[(&str, &str)]) -> FactoryContext {
        FactoryContext::new(Client::new(), Arc::new(env(pairs)))
    }

    #[test]
    fn spec_list_accepts_names_pairs_and_empty_slots() {
        let specs = DestinationSpec::parse_list(
            r#"["echo", null, false, {"type": "segment", "options": {"writeKey": "k"}}]"#,
        )
        .unwrap();
        assert_eq!(
            specs,
            vec![
                Some(DestinationSpec::named("echo")),
                None,
                None,
                Some(DestinationSpec::configured("segment", json!({"writeKey": "k"}))),
            ]
        );
        assert!(DestinationSpec::parse_list(r#"{"not": "a list"}"#).is_err());
        assert!(DestinationSpec::parse_list("[42]").is_err());
    }

    #[test]
    fn resolve_skips_empty_slots_and_keeps_order() {
        let registry = DestinationRegistry::builtin();
        let handles = registry
            .resolve(
                &[
                    Some(DestinationSpec::named("echo")),
                    None,
                    Some(DestinationSpec::configured(
                        "plausible",
                        json!({"domain": "example.com"}),
                    )),
                ],
                &factory_ctx(&[]),
            )
            .unwrap();
        let types: Vec<&str> = handles.iter().map(|d| d.destination_type()).collect();
        assert_eq!(types, vec!["echo", "plausible"]);
    }

    #[test]
    fn unknown_destination_fails_fast() {
        let err = DestinationRegistry::builtin()
            .resolve(&[Some(DestinationSpec::named("mixpanel"))], &factory_ctx(&[]))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownDestination(name) if name == "mixpanel"));
    }

    #[test]
    fn missing_credentials_fail_at_resolution() {
        let err = DestinationRegistry::builtin()
            .resolve(&[Some(DestinationSpec::named("segment"))], &factory_ctx(&[]))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingCredential { .. }));
    }

    #[test]
    fn custom_factories_can_be_registered() {
        let registry = DestinationRegistry::empty().with(
            "custom",
            |_options: &Value, _ctx: &FactoryContext| -> ConfigResult<Arc<dyn Destination>> {
                Ok(Arc::new(EchoDestination::new()))
            },
        );
        assert_eq!(registry.names(), vec!["custom"]);
        let handles = registry
            .resolve(&[Some(DestinationSpec::named("custom"))], &factory_ctx(&[]))
            .unwrap();
        assert_eq!(handles.len(), 1);
    }

    #[test]
    fn self_configuration_follows_credentials() {
        let specs = self_configured(&env(&[
            ("SEGMENT_WRITE_KEY", "abc"),
            ("JITSU_WRITE_KEY", "only-key"),
            ("POSTGREST_URL", "https://db.example.com/rest/v1/events"),
            ("POSTGREST_API_KEY", "secret"),
            ("BEACON_ECHO", "Yes"),
        ]));
        let enabled: Vec<&str> = specs
            .iter()
            .flatten()
            .map(DestinationSpec::destination_type)
            .collect();
        assert_eq!(enabled, vec!["segment", "postgrest", "echo"]);
        assert_eq!(specs.len(), 6);
    }
}
