//! Infrastructure layer: stores, caches, config, and the stateful services of
//! the authorization pipeline.

pub mod cache;
pub mod config;
pub mod error;
pub mod permission_cache;
pub mod policy;
pub mod sessions;
pub mod store;
pub mod token_service;

pub use error::InfraError;
pub use permission_cache::{PERMISSIONS_CACHE_KEY, PermissionCache};
pub use policy::PolicyEngine;
pub use sessions::{CacheSessions, NoopSessions, SessionRegistry};
pub use token_service::TokenService;
