//! `role.v1.RoleService`: role management over the policy engine.
//!
//! A role exists exactly when it has at least one policy tuple. Names are
//! lower-cased before use.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use warden_auth::{PolicyTuple, Role};
use warden_infra::PolicyEngine;

use crate::call::{CallResult, Handler, decode_payload, encode_payload, handler_fn};
use crate::status::Status;

pub const SERVICE: &str = "role.v1.RoleService";

pub const ROLE_EXISTS: &str = "role already exists";
pub const ROLE_MISSING: &str = "role does not exists";

#[derive(Debug, Clone, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleRequest {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleView {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RoleRpc {
    policy: Arc<PolicyEngine>,
}

impl RoleRpc {
    pub fn new(policy: Arc<PolicyEngine>) -> Self {
        Self { policy }
    }

    pub async fn find_all_roles(&self) -> CallResult {
        let data: Vec<RoleView> = self
            .policy
            .all_roles()
            .into_iter()
            .map(|role| RoleView {
                name: role.to_string(),
                permissions: Vec::new(),
            })
            .collect();
        Ok(json!({ "data": data }))
    }

    pub async fn find_role_by_name(&self, payload: &Value) -> CallResult {
        let req: NameRequest = decode_payload(payload)?;
        let role = role_name(&req.name)?;

        let tuples = self.existing(&role)?;
        encode_payload(&RoleView {
            name: role.to_string(),
            permissions: tuples.into_iter().map(|t| t.procedure).collect(),
        })
    }

    pub async fn create_role(&self, payload: &Value) -> CallResult {
        let req: RoleRequest = decode_payload(payload)?;
        let role = role_name(&req.name)?;
        let permissions = permission_list(req.permissions)?;

        if !self.policy.create_role(&role, &permissions).await? {
            return Err(Status::invalid_argument(ROLE_EXISTS));
        }

        info!(%role, tuples = permissions.len(), "role created");
        Ok(success())
    }

    pub async fn update_role(&self, payload: &Value) -> CallResult {
        let req: RoleRequest = decode_payload(payload)?;
        let role = role_name(&req.name)?;
        let permissions = permission_list(req.permissions)?;

        if self.policy.replace_role(&role, &permissions).await?.is_empty() {
            return Err(Status::invalid_argument(ROLE_MISSING));
        }

        info!(%role, tuples = permissions.len(), "role updated");
        Ok(success())
    }

    pub async fn delete_role(&self, payload: &Value) -> CallResult {
        let req: NameRequest = decode_payload(payload)?;
        let role = role_name(&req.name)?;

        let removed = self.policy.remove_role(&role).await?;
        if removed.is_empty() {
            return Err(Status::invalid_argument(ROLE_MISSING));
        }

        info!(%role, tuples = removed.len(), "role deleted");
        Ok(success())
    }

    fn existing(&self, role: &Role) -> Result<Vec<PolicyTuple>, Status> {
        let tuples = self.policy.filtered_policies(role.as_str());
        if tuples.is_empty() {
            return Err(Status::invalid_argument(ROLE_MISSING));
        }
        Ok(tuples)
    }

    /// `(procedure, handler)` pairs for registration.
    pub fn handlers(self) -> Vec<(String, Arc<dyn Handler>)> {
        let rpc = Arc::new(self);
        let route = |method: &str, op: Op| -> (String, Arc<dyn Handler>) {
            let rpc = Arc::clone(&rpc);
            let handler = handler_fn(move |_, payload| {
                let rpc = Arc::clone(&rpc);
                async move {
                    match op {
                        Op::FindAll => rpc.find_all_roles().await,
                        Op::FindByName => rpc.find_role_by_name(&payload).await,
                        Op::Create => rpc.create_role(&payload).await,
                        Op::Update => rpc.update_role(&payload).await,
                        Op::Delete => rpc.delete_role(&payload).await,
                    }
                }
            });
            (format!("{SERVICE}/{method}"), handler)
        };

        vec![
            route("FindAllRoles", Op::FindAll),
            route("FindRoleByName", Op::FindByName),
            route("CreateRole", Op::Create),
            route("UpdateRole", Op::Update),
            route("DeleteRole", Op::Delete),
        ]
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    FindAll,
    FindByName,
    Create,
    Update,
    Delete,
}

fn role_name(name: &str) -> Result<Role, Status> {
    let role = Role::normalized(name);
    if role.is_empty() {
        return Err(Status::invalid_argument("role name is required"));
    }
    Ok(role)
}

fn permission_list(permissions: Vec<String>) -> Result<Vec<String>, Status> {
    let mut permissions: Vec<String> = permissions
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    permissions.sort();
    permissions.dedup();

    if permissions.is_empty() {
        return Err(Status::invalid_argument("permissions must not be empty"));
    }
    Ok(permissions)
}

fn success() -> Value {
    json!({ "data": "success" })
}
