use axum::{
    routing::{get, post},
    Router,
};

use crate::app::AppState;
use crate::config::Settings;

pub mod collect;
pub mod debug;
pub mod system;

/// Collector endpoints, mounted under the configured API route.
pub fn router(settings: &Settings) -> Router<AppState> {
    let router = Router::new().route(&settings.api_route, post(collect::collect));
    if settings.debug_endpoint {
        router.route(&settings.debug_route(), get(debug::debug))
    } else {
        router
    }
}
