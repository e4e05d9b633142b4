//! The unary call boundary the interceptor chains around.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::status::Status;

pub type CallResult = Result<Value, Status>;

/// Per-call metadata: the fully-qualified procedure and request headers.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// `"<package>.<Service>/<Method>"`.
    pub procedure: String,
    pub headers: HeaderMap,
    pub received_at: DateTime<Utc>,
}

impl CallContext {
    pub fn new(procedure: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            procedure: procedure.into(),
            headers,
            received_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &CallContext, payload: &Value) -> CallResult;
}

#[async_trait]
impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    async fn call(&self, ctx: &CallContext, payload: &Value) -> CallResult {
        (**self).call(ctx, payload).await
    }
}

/// Handler backed by an async closure.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(CallContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult> + Send + 'static,
{
    async fn call(&self, ctx: &CallContext, payload: &Value) -> CallResult {
        (self.0)(ctx.clone(), payload.clone()).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(CallContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Decode a JSON payload into a request type.
pub fn decode_payload<T>(payload: &Value) -> Result<T, Status>
where
    T: serde::de::DeserializeOwned,
{
    T::deserialize(payload).map_err(|e| Status::invalid_argument(format!("invalid request: {e}")))
}

/// Encode a response type as a JSON payload.
pub fn encode_payload<T>(value: &T) -> CallResult
where
    T: serde::Serialize,
{
    serde_json::to_value(value).map_err(|e| Status::internal(format!("failed to encode response: {e}")))
}
