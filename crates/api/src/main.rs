use std::net::SocketAddr;

use anyhow::Context;
use axum::{extract::Path, response::Html, routing::get, Router};
use beacon_api::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    beacon_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    let listen_addr = settings.listen_addr;
    let app = beacon_api::build_app(settings, demo_site()).context("failed to build app")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// A few pages to point a browser at while wiring up destinations.
fn demo_site() -> Router {
    Router::new()
        .route("/", get(|| async { Html("<h1>beacon</h1><a href=\"/blog/hello\">blog</a>") }))
        .route(
            "/blog/:slug",
            get(|Path(slug): Path<String>| async move { Html(format!("<h1>{slug}</h1>")) }),
        )
}
