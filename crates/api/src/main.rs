use anyhow::Context;

use warden_api::app::{Stores, build_app};
use warden_infra::config::AppConfig;
use warden_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    warden_observability::init(&config.log.filter, LogFormat::from_json_flag(config.log.json));

    let stores = Stores::from_config(&config)
        .await
        .context("failed to connect backing stores")?;
    let app = build_app(&config, stores)
        .await
        .context("failed to build application")?;

    let addr = format!("{}:{}", config.app.host, config.app.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(name = %config.app.name, "listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
