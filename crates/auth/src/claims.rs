use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{AccountId, SessionId};

use crate::Role;

/// Registered claim set carried by every credential.
///
/// Access and refresh credentials of one session share `sub` and `jti`; only
/// the access credential carries `aud`, and its first entry is the caller's
/// role. A session is bound to a single role for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the account the credential was issued to.
    pub sub: AccountId,

    /// Session id (JWT `jti`).
    pub jti: SessionId,

    /// Expiration as unix seconds.
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<Role>,
}

impl Claims {
    pub fn access(sub: AccountId, jti: SessionId, expires_at: DateTime<Utc>, role: Role) -> Self {
        Self {
            sub,
            jti,
            exp: expires_at.timestamp(),
            aud: vec![role],
        }
    }

    pub fn refresh(sub: AccountId, jti: SessionId, expires_at: DateTime<Utc>) -> Self {
        Self {
            sub,
            jti,
            exp: expires_at.timestamp(),
            aud: Vec::new(),
        }
    }

    /// Role presented by this credential: the first audience entry, or `""`.
    pub fn role(&self) -> &str {
        self.aud.first().map(Role::as_str).unwrap_or("")
    }
}
