//! RPC handlers, one module per service.

pub mod auth;
pub mod roles;

pub use auth::AuthRpc;
pub use roles::RoleRpc;
