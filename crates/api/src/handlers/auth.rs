//! `auth.v1.AuthService`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_infra::TokenService;

use crate::call::{CallResult, Handler, decode_payload, encode_payload, handler_fn};

pub const SERVICE: &str = "auth.v1.AuthService";

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevokeResponse {
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct AuthRpc {
    tokens: Arc<TokenService>,
}

impl AuthRpc {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }

    pub async fn login(&self, payload: &Value) -> CallResult {
        let req: LoginRequest = decode_payload(payload)?;
        let pair = self.tokens.login(&req.email, &req.password).await?;
        encode_payload(&pair)
    }

    pub async fn refresh_token(&self, payload: &Value) -> CallResult {
        let req: TokenRequest = decode_payload(payload)?;
        let pair = self.tokens.refresh_token(&req.token).await?;
        encode_payload(&pair)
    }

    pub async fn revoke_token(&self, payload: &Value) -> CallResult {
        let req: TokenRequest = decode_payload(payload)?;
        let token = self.tokens.revoke_token(&req.token).await?;
        encode_payload(&RevokeResponse { token })
    }

    /// `(procedure, handler)` pairs for registration.
    pub fn handlers(self) -> Vec<(String, Arc<dyn Handler>)> {
        let rpc = Arc::new(self);
        vec![
            (procedure("Login"), {
                let rpc = Arc::clone(&rpc);
                handler_fn(move |_, payload| {
                    let rpc = Arc::clone(&rpc);
                    async move { rpc.login(&payload).await }
                })
            }),
            (procedure("RefreshToken"), {
                let rpc = Arc::clone(&rpc);
                handler_fn(move |_, payload| {
                    let rpc = Arc::clone(&rpc);
                    async move { rpc.refresh_token(&payload).await }
                })
            }),
            (procedure("RevokeToken"), {
                handler_fn(move |_, payload| {
                    let rpc = Arc::clone(&rpc);
                    async move { rpc.revoke_token(&payload).await }
                })
            }),
        ]
    }
}

fn procedure(method: &str) -> String {
    format!("{SERVICE}/{method}")
}
