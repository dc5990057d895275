use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use warden_api::app::{AppServices, build_app};
use warden_api::middleware::AuthState;
use warden_infra::config::WardenConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden_observability::init();

    let config = WardenConfig::from_env().context("loading configuration")?;
    let services = AppServices::in_memory(config.consistency_policy()).context("starting projection workers")?;
    let auth = AuthState::hs256(config.jwt_secret.as_bytes(), config.request_timeout);

    let app = build_app(Arc::new(services), auth);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await.context("serving http")?;
    Ok(())
}
