//! Analytics events and everything needed to build them from an HTTP request.
//!
//! The pipeline is `classify → build → enrich → identity`; delivery lives in
//! `beacon-infra`.

pub mod builder;
pub mod campaign;
pub mod classify;
pub mod enrich;
pub mod event;
pub mod identity;
pub mod request;
pub mod url;
pub mod user_agent;

pub use builder::EventBuilder;
pub use classify::{EventClassifier, Resolution, is_prefetch};
pub use enrich::{DefaultEnricher, EnrichError, Enricher, Previous, PropertiesEnricher, run_enrichment};
pub use event::{AnalyticsEvent, EventContext, EventKind, GeoContext, Library, PageContext};
pub use identity::IdentityResolver;
pub use request::{HttpRequestContext, RequestContext};
pub use url::{Protocol, PublicUrl};
pub use user_agent::UserAgentInfo;
