//! Unary JSON binding: `POST /{service}/{method}`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::call::{CallContext, Handler};
use crate::status::Status;

use super::AppState;

/// Procedure name → handler.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, procedure: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(procedure.into(), handler);
        self
    }

    pub fn extend(mut self, handlers: impl IntoIterator<Item = (String, Arc<dyn Handler>)>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    pub fn get(&self, procedure: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(procedure)
    }

    pub fn procedures(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("procedures", &self.procedures())
            .finish()
    }
}

pub async fn call(
    State(state): State<AppState>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let procedure = format!("{service}/{method}");
    let Some(handler) = state.registry.get(&procedure) else {
        return Status::unimplemented(format!("unknown procedure {procedure}")).into_response();
    };

    let payload = if body.is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => value,
            Err(e) => return Status::invalid_argument(format!("invalid JSON body: {e}")).into_response(),
        }
    };

    let ctx = CallContext::new(procedure, headers);
    match state.services.interceptor.intercept(&ctx, &payload, handler.as_ref()).await {
        Ok(response) => Json(response).into_response(),
        Err(status) => status.into_response(),
    }
}
