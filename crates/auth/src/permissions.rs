//! Authorization requirements and policy tuples.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::RuleId;

use crate::Role;

/// Authorization requirement for one procedure (e.g. `"pkg.Svc/Method"`).
///
/// The procedure name is the unique key. Rules with `deleted_at` set are
/// soft-deleted and never take part in a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub id: RuleId,
    pub name: String,
    pub procedure: String,
    pub require_auth: bool,
    pub require_hash: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PermissionRule {
    pub fn new(procedure: impl Into<String>, require_auth: bool, require_hash: bool) -> Self {
        let procedure = procedure.into();
        Self {
            id: RuleId::new(),
            name: procedure.clone(),
            procedure,
            require_auth,
            require_hash,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Procedure name → rule, as served by the permission cache.
pub type PermissionMap = HashMap<String, PermissionRule>;

/// `(role, procedure)`: "this role may invoke this procedure".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyTuple {
    pub role: Role,
    pub procedure: String,
}

impl PolicyTuple {
    pub fn new(role: impl Into<Role>, procedure: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            procedure: procedure.into(),
        }
    }
}
