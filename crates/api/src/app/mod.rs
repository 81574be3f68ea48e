//! HTTP application wiring (Axum router + collector wiring).
//!
//! - `routes/`: collector endpoints and health
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Router};
use beacon_core::{ConfigError, ConfigResult};
use beacon_events::{EventBuilder, EventClassifier, IdentityResolver};
use beacon_infra::{
    Collector, DestinationRegistry, Dispatcher, FactoryContext, self_configured,
};
use tower::ServiceBuilder;

use crate::config::Settings;
use crate::middleware::{self, TrackingState};

pub mod dto;
pub mod errors;
pub mod routes;

/// Shared state of the collector endpoints.
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<Collector>,
    pub settings: Arc<Settings>,
}

/// Build the collector from `settings` with the built-in destinations.
pub fn build_collector(settings: &Settings) -> ConfigResult<Collector> {
    build_collector_with(settings, &DestinationRegistry::builtin())
}

/// Build the collector, resolving destinations through `registry`.
///
/// Fails on invalid classification rules, unknown destinations and missing
/// credentials.
pub fn build_collector_with(
    settings: &Settings,
    registry: &DestinationRegistry,
) -> ConfigResult<Collector> {
    let classifier = EventClassifier::new(
        settings.classification_rules(),
        settings.fallback_event_type.clone(),
    )?;

    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| ConfigError::invalid(format!("failed to build HTTP client: {e}")))?;
    let factory_ctx =
        FactoryContext::new(client, settings.env.clone()).with_timeout(settings.remote_timeout);
    let specs = match &settings.destinations {
        Some(specs) => specs.clone(),
        None => self_configured(settings.env.as_ref()),
    };
    let destinations = registry.resolve(&specs, &factory_ctx)?;

    let dispatcher = Dispatcher::new(destinations);
    if dispatcher.is_empty() {
        tracing::warn!("no destinations configured; events will be built but not delivered");
    } else {
        tracing::info!(destinations = ?dispatcher.describe(), "destinations configured");
    }

    let identity = IdentityResolver::new(settings.cookie_name.clone())
        .with_cookie_domain(settings.cookie_domain.clone());

    let mut collector = Collector::new(classifier, dispatcher)
        .with_identity(identity)
        .with_builder(EventBuilder::default())
        .with_default_enricher(settings.defaults.clone());
    if let Some(enricher) = &settings.enricher {
        collector = collector.with_enricher(enricher.clone());
    }
    Ok(collector)
}

/// Wrap `site` with page tracking and mount the collector endpoints next to
/// it. Configuration errors surface here, at startup.
pub fn build_app(settings: Settings, site: Router) -> ConfigResult<Router> {
    let collector = build_collector(&settings)?;
    Ok(assemble(settings, collector, site))
}

/// Same as [`build_app`] with a custom destination registry.
pub fn build_app_with(
    settings: Settings,
    registry: &DestinationRegistry,
    site: Router,
) -> ConfigResult<Router> {
    let collector = build_collector_with(&settings, registry)?;
    Ok(assemble(settings, collector, site))
}

fn assemble(settings: Settings, collector: Collector, site: Router) -> Router {
    let collector = Arc::new(collector);
    let settings = Arc::new(settings);
    let tracking = TrackingState {
        collector: collector.clone(),
        settings: settings.clone(),
    };

    let tracked_site = site.layer(ServiceBuilder::new().layer(
        axum::middleware::from_fn_with_state(tracking, middleware::tracking_middleware),
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router(&settings).with_state(AppState {
            collector,
            settings: settings.clone(),
        }))
        .merge(tracked_site)
}
