//! Credential lifecycle: login, refresh, revoke, decode.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use warden_auth::{AuthError, AuthResult, Claims, ClaimsSigner, TOKEN_TYPE, TokenPair, verify_password};
use warden_core::SessionId;

use crate::error::bounded;
use crate::permission_cache::DEFAULT_STORE_TIMEOUT;
use crate::sessions::{NoopSessions, SessionRegistry};
use crate::store::{Account, AccountStore};

pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct TokenService {
    signer: Arc<dyn ClaimsSigner>,
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionRegistry>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    store_timeout: Duration,
}

impl TokenService {
    pub fn new(signer: Arc<dyn ClaimsSigner>, accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            signer,
            accounts,
            sessions: Arc::new(NoopSessions),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_ttls(mut self, access: Duration, refresh: Duration) -> Self {
        self.access_ttl = access;
        self.refresh_ttl = refresh;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionRegistry>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Exchange email + password for a fresh credential pair.
    #[instrument(skip(self, password), err)]
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<TokenPair> {
        let accounts = Arc::clone(&self.accounts);
        let lookup_email = email.to_string();
        let account = bounded("accounts.find_by_email", self.store_timeout, async move {
            accounts.find_by_email(&lookup_email).await
        })
        .await?
        .ok_or_else(|| AuthError::validation("account not found"))?;

        let hash = account.password_hash.clone();
        let candidate = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify_password(&hash, &candidate))
            .await
            .map_err(|e| AuthError::infrastructure(format!("password verification aborted: {e}")))?;
        if !matches {
            return Err(AuthError::validation("password is incorrect"));
        }

        let pair = self.issue(&account).await?;
        info!(sub = %account.id, "login succeeded");
        Ok(pair)
    }

    /// Exchange a valid credential for a new pair bound to a new session.
    #[instrument(skip_all, err)]
    pub async fn refresh_token(&self, token: &str) -> AuthResult<TokenPair> {
        let claims = self.decode(token)?;
        self.end_session(&claims).await?;

        let accounts = Arc::clone(&self.accounts);
        let sub = claims.sub;
        let account = bounded("accounts.find_by_id", self.store_timeout, async move {
            accounts.find_by_id(sub).await
        })
        .await?
        .ok_or_else(|| AuthError::validation("account not found"))?;

        self.issue(&account).await
    }

    /// Validate `token` and end its session; echoes the token back.
    ///
    /// Without session tracking this only validates.
    #[instrument(skip_all, err)]
    pub async fn revoke_token(&self, token: &str) -> AuthResult<String> {
        let claims = self.decode(token)?;
        self.end_session(&claims).await?;
        info!(sub = %claims.sub, jti = %claims.jti, "token revoked");
        Ok(token.to_string())
    }

    /// Verify signature and expiry.
    pub fn decode(&self, token: &str) -> AuthResult<Claims> {
        self.signer.verify(token)
    }

    async fn end_session(&self, claims: &Claims) -> AuthResult<()> {
        if !self.sessions.is_tracking() {
            return Ok(());
        }

        let sessions = Arc::clone(&self.sessions);
        let (sub, sid) = (claims.sub, claims.jti);
        let existed = bounded("sessions.consume", self.store_timeout, async move {
            sessions.consume(sub, sid).await
        })
        .await?;

        if existed {
            Ok(())
        } else {
            Err(AuthError::invalid_token("token is not found"))
        }
    }

    /// Sign refresh and access credentials for one new session in parallel.
    async fn issue(&self, account: &Account) -> AuthResult<TokenPair> {
        let sid = SessionId::new();
        let now = Utc::now();
        let refresh_expire = expiry(now, self.refresh_ttl)?;
        let access_expire = expiry(now, self.access_ttl)?;

        let refresh = Claims::refresh(account.id, sid, refresh_expire);
        let access = Claims::access(account.id, sid, access_expire, account.role.clone());

        let (refresh_token, access_token) = tokio::try_join!(
            joined(self.spawn_sign(refresh)),
            joined(self.spawn_sign(access)),
        )?;

        if self.sessions.is_tracking() {
            let sessions = Arc::clone(&self.sessions);
            let (sub, ttl) = (account.id, self.refresh_ttl);
            bounded("sessions.record", self.store_timeout, async move {
                sessions.record(sub, sid, ttl).await
            })
            .await?;
        }

        Ok(TokenPair {
            token_type: TOKEN_TYPE.to_string(),
            access_token,
            refresh_token,
            access_expire: access_expire.timestamp(),
            refresh_expire: refresh_expire.timestamp(),
        })
    }

    fn spawn_sign(&self, claims: Claims) -> JoinHandle<AuthResult<String>> {
        let signer = Arc::clone(&self.signer);
        tokio::task::spawn_blocking(move || signer.sign(&claims))
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("track_sessions", &self.sessions.is_tracking())
            .finish_non_exhaustive()
    }
}

async fn joined(handle: JoinHandle<AuthResult<String>>) -> AuthResult<String> {
    handle.await.map_err(|e| {
        warn!(error = %e, "signing task aborted");
        AuthError::Signing(e.to_string())
    })?
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> AuthResult<DateTime<Utc>> {
    i64::try_from(ttl.as_secs())
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| AuthError::Signing(format!("expiry out of range for ttl {ttl:?}")))
}
