use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Failures of the authorization pipeline and credential lifecycle.
///
/// Each variant maps onto exactly one RPC status at the transport edge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Credential missing or malformed at extraction time.
    #[error("{0}")]
    Unauthenticated(String),

    /// Credential present but failed signature/expiry/shape checks.
    #[error("{0}")]
    InvalidToken(String),

    /// Policy denied the `(role, procedure)` pair.
    #[error("{0}")]
    PermissionDenied(String),

    /// Malformed input or lookup miss (unknown subject, wrong password, ...).
    #[error("{0}")]
    Validation(String),

    /// Credential generation failed; no partial token pair is ever returned.
    #[error("failed to sign token: {0}")]
    Signing(String),

    /// A backing store or cache could not be reached.
    #[error("infrastructure unavailable: {0}")]
    Infrastructure(String),
}

impl AuthError {
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn invalid_token(msg: impl Into<String>) -> Self {
        Self::InvalidToken(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn infrastructure(msg: impl Into<String>) -> Self {
        Self::Infrastructure(msg.into())
    }
}
