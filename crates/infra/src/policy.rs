//! Role-based policy engine over a durable tuple store.
//!
//! Reads go to an immutable [`RbacModel`] snapshot. Writers serialize on an
//! async mutex, persist through the [`PolicyAdapter`] first, then publish a new
//! snapshot, so readers see either the old or the new tuple set in full.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use warden_auth::{PolicyTuple, RbacModel, Role};

use crate::error::bounded;
use crate::permission_cache::DEFAULT_STORE_TIMEOUT;
use crate::store::PolicyAdapter;
use crate::InfraError;

pub struct PolicyEngine {
    adapter: Arc<dyn PolicyAdapter>,
    model: RwLock<Arc<RbacModel>>,
    writer: Mutex<()>,
    store_timeout: Duration,
}

impl PolicyEngine {
    /// Build an engine and load the full tuple set from `adapter`.
    pub async fn new(adapter: Arc<dyn PolicyAdapter>) -> Result<Self, InfraError> {
        Self::with_store_timeout(adapter, DEFAULT_STORE_TIMEOUT).await
    }

    pub async fn with_store_timeout(
        adapter: Arc<dyn PolicyAdapter>,
        store_timeout: Duration,
    ) -> Result<Self, InfraError> {
        let engine = Self {
            adapter,
            model: RwLock::new(Arc::new(RbacModel::new())),
            writer: Mutex::new(()),
            store_timeout,
        };
        engine.load_policy().await?;
        Ok(engine)
    }

    /// Current immutable model.
    pub fn snapshot(&self) -> Arc<RbacModel> {
        Arc::clone(&self.model.read())
    }

    pub fn enforce(&self, role: &str, procedure: &str) -> bool {
        self.snapshot().enforce(role, procedure)
    }

    pub fn filtered_policies(&self, role: &str) -> Vec<PolicyTuple> {
        self.snapshot().filtered(role)
    }

    pub fn all_roles(&self) -> Vec<Role> {
        self.snapshot().roles()
    }

    /// Replace the in-memory model with the adapter's current contents.
    #[instrument(skip(self), err)]
    pub async fn load_policy(&self) -> Result<(), InfraError> {
        let _guard = self.writer.lock().await;
        let adapter = Arc::clone(&self.adapter);
        let tuples = bounded("policy.load", self.store_timeout, async move {
            adapter.load_policy().await
        })
        .await?;

        let model = RbacModel::from_tuples(&tuples);
        info!(tuples = model.len(), "policy loaded");
        self.publish(model);
        Ok(())
    }

    #[instrument(skip(self, tuples), fields(count = tuples.len()), err)]
    pub async fn add_policies(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError> {
        let _guard = self.writer.lock().await;
        self.apply_add(tuples).await
    }

    #[instrument(skip(self, tuples), fields(count = tuples.len()), err)]
    pub async fn remove_policies(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError> {
        let _guard = self.writer.lock().await;
        self.apply_remove(tuples).await
    }

    /// Create `role` with the given procedures. Returns `false` without
    /// writing anything when the role already has tuples.
    #[instrument(skip(self, procedures), fields(role = %role), err)]
    pub async fn create_role(&self, role: &Role, procedures: &[String]) -> Result<bool, InfraError> {
        let _guard = self.writer.lock().await;
        if !self.snapshot().filtered(role.as_str()).is_empty() {
            return Ok(false);
        }
        self.apply_add(&role_tuples(role, procedures)).await?;
        Ok(true)
    }

    /// Swap a role's procedure set in one step. Returns the tuples that were
    /// removed; an empty list means the role did not exist and nothing was
    /// written.
    #[instrument(skip(self, procedures), fields(role = %role), err)]
    pub async fn replace_role(
        &self,
        role: &Role,
        procedures: &[String],
    ) -> Result<Vec<PolicyTuple>, InfraError> {
        let _guard = self.writer.lock().await;
        let old = self.snapshot().filtered(role.as_str());
        if old.is_empty() {
            return Ok(old);
        }

        let new = role_tuples(role, procedures);
        bounded(
            "policy.replace",
            self.store_timeout,
            self.adapter.replace_policies(&old, &new),
        )
        .await?;
        self.publish_change(&old, &new);
        Ok(old)
    }

    /// Drop every tuple of `role`. Returns the tuples that were removed.
    #[instrument(skip(self), fields(role = %role), err)]
    pub async fn remove_role(&self, role: &Role) -> Result<Vec<PolicyTuple>, InfraError> {
        let _guard = self.writer.lock().await;
        let old = self.snapshot().filtered(role.as_str());
        self.apply_remove(&old).await?;
        Ok(old)
    }

    async fn apply_add(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError> {
        if tuples.is_empty() {
            return Ok(());
        }
        bounded("policy.add", self.store_timeout, self.adapter.add_policies(tuples)).await?;
        self.publish_change(&[], tuples);
        Ok(())
    }

    async fn apply_remove(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError> {
        if tuples.is_empty() {
            return Ok(());
        }
        bounded("policy.remove", self.store_timeout, self.adapter.remove_policies(tuples)).await?;
        self.publish_change(tuples, &[]);
        Ok(())
    }

    /// Publish one snapshot with `removed` dropped and `added` inserted.
    fn publish_change(&self, removed: &[PolicyTuple], added: &[PolicyTuple]) {
        let mut next = RbacModel::clone(&self.snapshot());
        for tuple in removed {
            next.remove(tuple);
        }
        for tuple in added {
            next.insert(tuple);
        }
        self.publish(next);
    }

    fn publish(&self, model: RbacModel) {
        *self.model.write() = Arc::new(model);
    }
}

fn role_tuples(role: &Role, procedures: &[String]) -> Vec<PolicyTuple> {
    procedures
        .iter()
        .map(|p| PolicyTuple::new(role.clone(), p.clone()))
        .collect()
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("tuples", &self.snapshot().len())
            .finish_non_exhaustive()
    }
}
