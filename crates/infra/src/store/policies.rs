use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use warden_auth::PolicyTuple;

use crate::InfraError;

/// Durable backing for the RBAC tuple set.
///
/// `add_policies` is idempotent: tuples already present are left alone.
#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    async fn load_policy(&self) -> Result<Vec<PolicyTuple>, InfraError>;

    async fn add_policies(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError>;

    async fn remove_policies(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError>;

    /// Remove `removed` and add `added` as one unit: either both land or
    /// neither does.
    async fn replace_policies(
        &self,
        removed: &[PolicyTuple],
        added: &[PolicyTuple],
    ) -> Result<(), InfraError>;
}

#[async_trait]
impl<A> PolicyAdapter for Arc<A>
where
    A: PolicyAdapter + ?Sized,
{
    async fn load_policy(&self) -> Result<Vec<PolicyTuple>, InfraError> {
        (**self).load_policy().await
    }

    async fn add_policies(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError> {
        (**self).add_policies(tuples).await
    }

    async fn remove_policies(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError> {
        (**self).remove_policies(tuples).await
    }

    async fn replace_policies(
        &self,
        removed: &[PolicyTuple],
        added: &[PolicyTuple],
    ) -> Result<(), InfraError> {
        (**self).replace_policies(removed, added).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPolicyAdapter {
    tuples: RwLock<BTreeSet<PolicyTuple>>,
}

impl InMemoryPolicyAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tuples(tuples: impl IntoIterator<Item = PolicyTuple>) -> Self {
        Self {
            tuples: RwLock::new(tuples.into_iter().collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.tuples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.read().is_empty()
    }
}

#[async_trait]
impl PolicyAdapter for InMemoryPolicyAdapter {
    async fn load_policy(&self) -> Result<Vec<PolicyTuple>, InfraError> {
        Ok(self.tuples.read().iter().cloned().collect())
    }

    async fn add_policies(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError> {
        self.tuples.write().extend(tuples.iter().cloned());
        Ok(())
    }

    async fn remove_policies(&self, tuples: &[PolicyTuple]) -> Result<(), InfraError> {
        let mut stored = self.tuples.write();
        for tuple in tuples {
            stored.remove(tuple);
        }
        Ok(())
    }

    async fn replace_policies(
        &self,
        removed: &[PolicyTuple],
        added: &[PolicyTuple],
    ) -> Result<(), InfraError> {
        let mut stored = self.tuples.write();
        for tuple in removed {
            stored.remove(tuple);
        }
        stored.extend(added.iter().cloned());
        Ok(())
    }
}
