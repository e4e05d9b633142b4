use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use warden_auth::PermissionRule;

use crate::InfraError;

/// Source of truth for per-procedure authorization requirements.
#[async_trait]
pub trait PermissionRuleStore: Send + Sync {
    /// All non-deleted rules, most recently created first.
    async fn find_active(&self) -> Result<Vec<PermissionRule>, InfraError>;
}

#[async_trait]
impl<S> PermissionRuleStore for Arc<S>
where
    S: PermissionRuleStore + ?Sized,
{
    async fn find_active(&self) -> Result<Vec<PermissionRule>, InfraError> {
        (**self).find_active().await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPermissionStore {
    rules: RwLock<Vec<PermissionRule>>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = PermissionRule>) -> Self {
        Self {
            rules: RwLock::new(rules.into_iter().collect()),
        }
    }

    pub fn insert(&self, rule: PermissionRule) {
        self.rules.write().push(rule);
    }

    /// Soft-delete every live rule for `procedure`. Returns how many were marked.
    pub fn soft_delete(&self, procedure: &str) -> usize {
        let now = Utc::now();
        let mut rules = self.rules.write();
        let mut marked = 0;
        for rule in rules.iter_mut().filter(|r| r.procedure == procedure && !r.is_deleted()) {
            rule.deleted_at = Some(now);
            marked += 1;
        }
        marked
    }
}

#[async_trait]
impl PermissionRuleStore for InMemoryPermissionStore {
    async fn find_active(&self) -> Result<Vec<PermissionRule>, InfraError> {
        let mut rules: Vec<PermissionRule> = self
            .rules
            .read()
            .iter()
            .filter(|r| !r.is_deleted())
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rules)
    }
}
