//! Pure authentication and authorization building blocks.
//!
//! This crate is intentionally decoupled from transport and storage: it knows
//! how to sign and verify credentials, hash passwords, and evaluate RBAC tuples,
//! but never performs IO.

pub mod claims;
pub mod error;
pub mod password;
pub mod permissions;
pub mod rbac;
pub mod roles;
pub mod token;

pub use claims::Claims;
pub use error::{AuthError, AuthResult};
pub use password::{hash_password, verify_password};
pub use permissions::{PermissionMap, PermissionRule, PolicyTuple};
pub use rbac::RbacModel;
pub use roles::Role;
pub use token::{ClaimsSigner, JwtCodec, TokenPair, TOKEN_TYPE};
