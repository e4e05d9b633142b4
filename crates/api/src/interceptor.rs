//! Authorization interceptor around unary handlers.
//!
//! Stages for one call:
//!
//! 1. Run the wrapped handler (or defer it, see [`ExecutionOrder`]).
//! 2. Look up the procedure's [`PermissionRule`]. No rule: the handler's
//!    result is returned as is.
//! 3. `require_auth`: extract the bearer credential and decode it.
//! 4. Enforce `(role, procedure)` against the policy engine.
//! 5. `require_hash`: hand the response to the [`ResponseTransform`].
//! 6. Queue an audit record.
//!
//! A failure in stages 3 or 4 replaces the handler's result.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use serde_json::Value;
use tracing::{debug, instrument};

use warden_auth::{AuthError, PermissionRule};
use warden_infra::config::{ExecutionOrder, LookupFailurePolicy};
use warden_infra::{PermissionCache, PolicyEngine, TokenService};

use crate::audit::{AuditRecord, AuditSink};
use crate::call::{CallContext, CallResult, Handler};
use crate::status::Status;

pub const MISSING_CREDENTIAL: &str = "Request unauthenticated with Bearer";
pub const MALFORMED_CREDENTIAL: &str = "Bad authorization string";
pub const PERMISSION_DENIED: &str = "Permission denied";

/// Post-processing for procedures whose rule sets `require_hash`.
#[async_trait]
pub trait ResponseTransform: Send + Sync {
    async fn transform(&self, ctx: &CallContext, response: Value) -> CallResult;
}

/// Returns responses untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

#[async_trait]
impl ResponseTransform for Passthrough {
    async fn transform(&self, _: &CallContext, response: Value) -> CallResult {
        Ok(response)
    }
}

pub struct AuthInterceptor {
    permissions: Arc<PermissionCache>,
    tokens: Arc<TokenService>,
    policy: Arc<PolicyEngine>,
    transform: Arc<dyn ResponseTransform>,
    audit: Option<AuditSink>,
    order: ExecutionOrder,
    on_lookup_failure: LookupFailurePolicy,
}

impl AuthInterceptor {
    pub fn new(
        permissions: Arc<PermissionCache>,
        tokens: Arc<TokenService>,
        policy: Arc<PolicyEngine>,
    ) -> Self {
        Self {
            permissions,
            tokens,
            policy,
            transform: Arc::new(Passthrough),
            audit: None,
            order: ExecutionOrder::default(),
            on_lookup_failure: LookupFailurePolicy::default(),
        }
    }

    pub fn with_audit(mut self, audit: AuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn ResponseTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_order(mut self, order: ExecutionOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_lookup_failure(mut self, policy: LookupFailurePolicy) -> Self {
        self.on_lookup_failure = policy;
        self
    }

    /// Chain this interceptor in front of `inner`.
    pub fn wrap(self: &Arc<Self>, inner: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(Intercepted {
            interceptor: Arc::clone(self),
            inner,
        })
    }

    #[instrument(skip_all, fields(procedure = %ctx.procedure))]
    pub async fn intercept(&self, ctx: &CallContext, payload: &Value, inner: &dyn Handler) -> CallResult {
        let result = match self.order {
            ExecutionOrder::ExecuteThenAuthorize => {
                let handled = inner.call(ctx, payload).await;
                match self.authorize(ctx).await {
                    Ok(rule) => self.finish(ctx, rule, handled).await,
                    Err(status) => Err(status),
                }
            }
            ExecutionOrder::AuthorizeThenExecute => match self.authorize(ctx).await {
                Ok(rule) => {
                    let handled = inner.call(ctx, payload).await;
                    self.finish(ctx, rule, handled).await
                }
                Err(status) => Err(status),
            },
        };

        if let Some(audit) = &self.audit {
            audit.log(AuditRecord::new(ctx, payload, &result));
        }
        result
    }

    /// Lookup, authenticate and authorize. `Ok(None)` means public.
    async fn authorize(&self, ctx: &CallContext) -> Result<Option<PermissionRule>, Status> {
        let Some(rule) = self.rule_for(&ctx.procedure).await? else {
            return Ok(None);
        };

        if rule.require_auth {
            let token = extract_bearer(&ctx.headers)?;
            let claims = self.tokens.decode(token)?;
            let role = claims.role();
            if !self.policy.enforce(role, &ctx.procedure) {
                debug!(%role, sub = %claims.sub, "policy denied call");
                return Err(AuthError::denied(PERMISSION_DENIED).into());
            }
        }
        Ok(Some(rule))
    }

    async fn rule_for(&self, procedure: &str) -> Result<Option<PermissionRule>, Status> {
        match self.on_lookup_failure {
            LookupFailurePolicy::FailOpen => Ok(self.permissions.lookup(procedure).await),
            LookupFailurePolicy::FailClosed => self
                .permissions
                .try_get_all()
                .await
                .map(|rules| rules.get(procedure).cloned())
                .map_err(|e| Status::unavailable(format!("permission rules unavailable: {e}"))),
        }
    }

    async fn finish(&self, ctx: &CallContext, rule: Option<PermissionRule>, handled: CallResult) -> CallResult {
        match (rule, handled) {
            (Some(rule), Ok(response)) if rule.require_hash => self.transform.transform(ctx, response).await,
            (_, handled) => handled,
        }
    }
}

impl std::fmt::Debug for AuthInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInterceptor")
            .field("order", &self.order)
            .field("on_lookup_failure", &self.on_lookup_failure)
            .field("audit", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

struct Intercepted {
    interceptor: Arc<AuthInterceptor>,
    inner: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for Intercepted {
    async fn call(&self, ctx: &CallContext, payload: &Value) -> CallResult {
        self.interceptor.intercept(ctx, payload, self.inner.as_ref()).await
    }
}

/// Bearer credential from the `authorization` header.
///
/// The scheme is matched case-insensitively.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AuthError::unauthenticated(MISSING_CREDENTIAL))?;

    let header = header
        .to_str()
        .map_err(|_| AuthError::unauthenticated(MALFORMED_CREDENTIAL))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AuthError::unauthenticated(MALFORMED_CREDENTIAL))?;

    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::unauthenticated(MALFORMED_CREDENTIAL));
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::http::HeaderValue;
    use serde_json::json;

    use warden_auth::{Claims, ClaimsSigner, JwtCodec, PolicyTuple, Role};
    use warden_core::{AccountId, SessionId};
    use warden_infra::cache::InMemoryCache;
    use warden_infra::store::{InMemoryAccountStore, InMemoryPermissionStore, InMemoryPolicyAdapter, PermissionRuleStore};
    use warden_infra::InfraError;

    use super::*;
    use crate::call::handler_fn;
    use crate::status::Code;

    const SECRET: &str = "interceptor-test-secret";
    const GUARDED: &str = "pkg.Svc/Method";
    const HASHED: &str = "pkg.Svc/Hashed";

    struct DownStore;

    #[async_trait]
    impl PermissionRuleStore for DownStore {
        async fn find_active(&self) -> Result<Vec<PermissionRule>, InfraError> {
            Err(InfraError::Store("connection refused".into()))
        }
    }

    struct Stamp;

    #[async_trait]
    impl ResponseTransform for Stamp {
        async fn transform(&self, _: &CallContext, response: Value) -> CallResult {
            Ok(json!({ "stamped": response }))
        }
    }

    struct Fixture {
        interceptor: AuthInterceptor,
        calls: Arc<AtomicUsize>,
        handler: Arc<dyn Handler>,
    }

    async fn fixture_with(store: Arc<dyn PermissionRuleStore>) -> Fixture {
        let permissions = Arc::new(PermissionCache::new(store, Arc::new(InMemoryCache::new())));
        let policy = Arc::new(
            PolicyEngine::new(Arc::new(InMemoryPolicyAdapter::with_tuples([
                PolicyTuple::new("admin", GUARDED),
                PolicyTuple::new("admin", HASHED),
            ])))
            .await
            .unwrap(),
        );
        let tokens = Arc::new(TokenService::new(
            Arc::new(JwtCodec::new(SECRET)),
            Arc::new(InMemoryAccountStore::new()),
        ));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = handler_fn(move |_, payload| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "echo": payload }))
            }
        });

        Fixture {
            interceptor: AuthInterceptor::new(permissions, tokens, policy),
            calls,
            handler,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryPermissionStore::with_rules([
            PermissionRule::new(GUARDED, true, false),
            PermissionRule::new(HASHED, true, true),
        ])))
        .await
    }

    fn bearer(role: &str) -> HeaderMap {
        let claims = Claims::access(
            AccountId::new(),
            SessionId::new(),
            chrono::Utc::now() + chrono::Duration::minutes(5),
            Role::new(role.to_string()),
        );
        let token = JwtCodec::new(SECRET).sign(&claims).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}")).unwrap());
        headers
    }

    async fn call(f: &Fixture, procedure: &str, headers: HeaderMap) -> CallResult {
        let ctx = CallContext::new(procedure, headers);
        f.interceptor.intercept(&ctx, &json!({"n": 1}), f.handler.as_ref()).await
    }

    #[tokio::test]
    async fn procedure_without_rule_passes_through() {
        let f = fixture().await;
        let result = call(&f, "pkg.Svc/Open", HeaderMap::new()).await;
        assert_eq!(result, Ok(json!({"echo": {"n": 1}})));
    }

    #[tokio::test]
    async fn missing_credential_replaces_successful_result() {
        let f = fixture().await;
        let err = call(&f, GUARDED, HeaderMap::new()).await.unwrap_err();

        assert_eq!(err, Status::unauthenticated(MISSING_CREDENTIAL));
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn authorize_first_skips_handler_on_failure() {
        let mut f = fixture().await;
        f.interceptor = f.interceptor.with_order(ExecutionOrder::AuthorizeThenExecute);

        let err = call(&f, GUARDED, HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.code, Code::Unauthenticated);
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);

        assert!(call(&f, GUARDED, bearer("admin")).await.is_ok());
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undecodable_credential_is_invalid_argument() {
        let f = fixture().await;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer not.a.jwt"));

        let err = call(&f, GUARDED, headers).await.unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
    }

    #[tokio::test]
    async fn role_without_tuple_is_denied() {
        let f = fixture().await;
        let err = call(&f, GUARDED, bearer("viewer")).await.unwrap_err();
        assert_eq!(err, Status::permission_denied(PERMISSION_DENIED));
    }

    #[tokio::test]
    async fn empty_role_is_denied() {
        let f = fixture().await;
        let err = call(&f, GUARDED, bearer("")).await.unwrap_err();
        assert_eq!(err.code, Code::PermissionDenied);
    }

    #[tokio::test]
    async fn permitted_role_gets_handler_result() {
        let f = fixture().await;
        let result = call(&f, GUARDED, bearer("admin")).await;
        assert_eq!(result, Ok(json!({"echo": {"n": 1}})));
    }

    #[tokio::test]
    async fn hash_stage_runs_transform() {
        let mut f = fixture().await;
        f.interceptor = f.interceptor.with_transform(Arc::new(Stamp));

        let result = call(&f, HASHED, bearer("admin")).await.unwrap();
        assert_eq!(result, json!({"stamped": {"echo": {"n": 1}}}));

        let untouched = call(&f, GUARDED, bearer("admin")).await.unwrap();
        assert_eq!(untouched, json!({"echo": {"n": 1}}));
    }

    #[tokio::test]
    async fn store_outage_fails_open_by_default() {
        let f = fixture_with(Arc::new(DownStore)).await;
        assert!(call(&f, GUARDED, HeaderMap::new()).await.is_ok());
    }

    #[tokio::test]
    async fn store_outage_fails_closed_when_configured() {
        let mut f = fixture_with(Arc::new(DownStore)).await;
        f.interceptor = f.interceptor.with_lookup_failure(LookupFailurePolicy::FailClosed);

        let err = call(&f, "pkg.Svc/Open", HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.code, Code::Unavailable);
    }

    #[tokio::test]
    async fn wrapped_handler_behaves_like_intercept() {
        let f = fixture().await;
        let interceptor = Arc::new(f.interceptor);
        let wrapped = interceptor.wrap(f.handler.clone());

        let ctx = CallContext::new(GUARDED, HeaderMap::new());
        let err = wrapped.call(&ctx, &Value::Null).await.unwrap_err();
        assert_eq!(err.code, Code::Unauthenticated);
    }

    #[tokio::test]
    async fn audit_queue_receives_each_call() {
        let f = fixture().await;
        let sink = AuditSink::spawn(4);
        let interceptor = f.interceptor.with_audit(sink.clone());
        let ctx = CallContext::new(GUARDED, HeaderMap::new());

        let _ = interceptor.intercept(&ctx, &Value::Null, f.handler.as_ref()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            extract_bearer(&headers),
            Err(AuthError::unauthenticated(MISSING_CREDENTIAL))
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bEaReR tok"));
        assert_eq!(extract_bearer(&headers), Ok("tok"));

        for bad in ["Basic tok", "Bearer", "Bearer   ", "tok"] {
            headers.insert(AUTHORIZATION, HeaderValue::from_static(bad));
            assert_eq!(
                extract_bearer(&headers),
                Err(AuthError::unauthenticated(MALFORMED_CREDENTIAL)),
                "{bad}"
            );
        }
    }
}
