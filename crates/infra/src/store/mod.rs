//! Persistent stores behind the authorization pipeline.
//!
//! Each boundary has an in-memory implementation (tests/dev) and a Postgres
//! one in [`postgres`].

pub mod accounts;
pub mod permissions;
pub mod policies;
pub mod postgres;

pub use accounts::{Account, AccountStore, InMemoryAccountStore};
pub use permissions::{InMemoryPermissionStore, PermissionRuleStore};
pub use policies::{InMemoryPolicyAdapter, PolicyAdapter};
pub use postgres::PgStore;
