//! HTTP integration: tracking middleware, collector endpoints and settings.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;

pub use app::{build_app, build_app_with};
pub use config::Settings;
pub use context::{Analytics, Tracked};
