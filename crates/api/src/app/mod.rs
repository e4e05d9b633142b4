//! HTTP application wiring (Axum router + service wiring).

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use tower::ServiceBuilder;

use warden_infra::config::AppConfig;
use warden_infra::InfraError;

use crate::handlers::{AuthRpc, RoleRpc};

pub mod rpc;
pub mod services;

pub use rpc::Registry;
pub use services::{InMemoryStores, Services, Stores, build_services};

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub registry: Arc<Registry>,
}

/// Every built-in RPC handler.
pub fn default_registry(services: &Services) -> Registry {
    Registry::new()
        .extend(AuthRpc::new(services.tokens.clone()).handlers())
        .extend(RoleRpc::new(services.policy.clone()).handlers())
}

pub fn router(services: Services, registry: Registry) -> Router {
    let state = AppState {
        services,
        registry: Arc::new(registry),
    };

    Router::new()
        .route("/:service/:method", post(rpc::call))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(DefaultBodyLimit::max(MAX_BODY_BYTES)))
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig, stores: Stores) -> Result<Router, InfraError> {
    let services = build_services(config, stores).await?;
    let registry = default_registry(&services);
    Ok(router(services, registry))
}
