//! Credential signing and verification (JWT, HMAC-SHA-512).

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{AuthError, AuthResult, Claims};

/// Scheme expected in the `authorization` header and returned to clients.
pub const TOKEN_TYPE: &str = "Bearer";

/// Signs and verifies claim sets.
///
/// The token service signs on blocking tasks, so implementations must be
/// shareable across threads.
pub trait ClaimsSigner: Send + Sync {
    fn sign(&self, claims: &Claims) -> AuthResult<String>;

    /// Verify signature and expiry, returning the decoded claims.
    fn verify(&self, token: &str) -> AuthResult<Claims>;
}

impl<S> ClaimsSigner for Arc<S>
where
    S: ClaimsSigner + ?Sized,
{
    fn sign(&self, claims: &Claims) -> AuthResult<String> {
        (**self).sign(claims)
    }

    fn verify(&self, token: &str) -> AuthResult<Claims> {
        (**self).verify(token)
    }
}

/// HS512 JWT codec over one shared secret.
///
/// The secret is injected once at construction; nothing here reads process
/// state.
#[derive(Clone)]
pub struct JwtCodec {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl JwtCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();

        let mut validation = Validation::new(Algorithm::HS512);
        validation.leeway = 0;
        // `aud` carries the role, not a relying-party identifier.
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret)),
            decoding_key: Arc::new(DecodingKey::from_secret(secret)),
            validation: Arc::new(validation),
        }
    }

    /// Clock skew tolerance applied to `exp`.
    pub fn with_leeway(mut self, secs: u64) -> Self {
        let mut validation = (*self.validation).clone();
        validation.leeway = secs;
        self.validation = Arc::new(validation);
        self
    }
}

impl ClaimsSigner for JwtCodec {
    fn sign(&self, claims: &Claims) -> AuthResult<String> {
        encode(&Header::new(Algorithm::HS512), claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, "failed to sign token");
            AuthError::Signing(e.to_string())
        })
    }

    fn verify(&self, token: &str) -> AuthResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "failed to verify token");
                map_jwt_error(&e)
            })
    }
}

impl core::fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JwtCodec")
            .field("algorithm", &Algorithm::HS512)
            .field("leeway", &self.validation.leeway)
            .finish()
    }
}

fn map_jwt_error(e: &jsonwebtoken::errors::Error) -> AuthError {
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::invalid_token("token has expired"),
        ErrorKind::InvalidSignature => AuthError::invalid_token("invalid token signature"),
        ErrorKind::InvalidAlgorithm => AuthError::invalid_token("unexpected signing method"),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            AuthError::invalid_token("invalid token format")
        }
        ErrorKind::MissingRequiredClaim(claim) => {
            AuthError::invalid_token(format!("missing required claim: {claim}"))
        }
        _ => AuthError::invalid_token(format!("token validation failed: {e}")),
    }
}

/// Credential pair handed out by login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub access_expire: i64,
    /// Unix seconds.
    pub refresh_expire: i64,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    use warden_core::{AccountId, SessionId};

    use super::*;
    use crate::Role;

    const SECRET: &str = "test-secret-key-that-is-long-enough-for-testing";

    fn claims_expiring_in(secs: i64, roles: Vec<String>) -> Claims {
        Claims {
            sub: AccountId::new(),
            jti: SessionId::new(),
            exp: Utc::now().timestamp() + secs,
            aud: roles.into_iter().map(Role::from).collect(),
        }
    }

    proptest! {
        #[test]
        fn verify_inverts_sign_for_live_claims(
            secs in 60i64..1_000_000,
            roles in proptest::collection::vec("[a-z]{1,12}", 0..3),
        ) {
            let codec = JwtCodec::new(SECRET);
            let claims = claims_expiring_in(secs, roles);
            let token = codec.sign(&claims).unwrap();
            prop_assert_eq!(codec.verify(&token).unwrap(), claims);
        }

        #[test]
        fn verify_rejects_expired_claims(secs in 1i64..1_000_000) {
            let codec = JwtCodec::new(SECRET);
            let claims = claims_expiring_in(-secs, vec!["admin".to_string()]);
            let token = codec.sign(&claims).unwrap();
            prop_assert_eq!(
                codec.verify(&token).unwrap_err(),
                AuthError::invalid_token("token has expired")
            );
        }
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signer = JwtCodec::new("secret-one-for-testing-purposes");
        let verifier = JwtCodec::new("secret-two-for-testing-purposes");

        let token = signer.sign(&claims_expiring_in(3600, vec![])).unwrap();
        assert_eq!(
            verifier.verify(&token).unwrap_err(),
            AuthError::invalid_token("invalid token signature")
        );
    }

    #[test]
    fn other_hmac_variants_are_rejected() {
        let claims = claims_expiring_in(3600, vec!["admin".to_string()]);
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = JwtCodec::new(SECRET).verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn garbage_is_invalid_format() {
        let err = JwtCodec::new(SECRET).verify("invalid.token.here").unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn leeway_accepts_recently_expired_tokens() {
        let codec = JwtCodec::new(SECRET).with_leeway(120);
        let claims = Claims::refresh(AccountId::new(), SessionId::new(), Utc::now() - Duration::seconds(30));
        let token = codec.sign(&claims).unwrap();
        assert_eq!(codec.verify(&token).unwrap(), claims);
    }
}
