//! In-memory RBAC model: the tuple set the policy engine enforces against.

use std::collections::{BTreeMap, BTreeSet};

use crate::{PolicyTuple, Role};

/// Role → procedures the role may invoke.
///
/// Pure data: no IO, no locking. The policy engine owns a snapshot of this
/// model and swaps it wholesale on mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RbacModel {
    grants: BTreeMap<String, BTreeSet<String>>,
}

impl RbacModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tuples<'a>(tuples: impl IntoIterator<Item = &'a PolicyTuple>) -> Self {
        let mut model = Self::new();
        for tuple in tuples {
            model.insert(tuple);
        }
        model
    }

    /// Is `role` granted `procedure`?
    ///
    /// An empty role is never granted anything.
    pub fn enforce(&self, role: &str, procedure: &str) -> bool {
        if role.is_empty() {
            return false;
        }

        self.grants
            .get(role)
            .is_some_and(|procedures| procedures.contains(procedure))
    }

    /// Returns `true` if the tuple was not present before.
    pub fn insert(&mut self, tuple: &PolicyTuple) -> bool {
        self.grants
            .entry(tuple.role.as_str().to_string())
            .or_default()
            .insert(tuple.procedure.clone())
    }

    /// Returns `true` if the tuple was present.
    pub fn remove(&mut self, tuple: &PolicyTuple) -> bool {
        let role = tuple.role.as_str();
        let Some(procedures) = self.grants.get_mut(role) else {
            return false;
        };

        let removed = procedures.remove(&tuple.procedure);
        if procedures.is_empty() {
            self.grants.remove(role);
        }
        removed
    }

    /// All tuples whose role is `role`, ordered by procedure.
    pub fn filtered(&self, role: &str) -> Vec<PolicyTuple> {
        self.grants
            .get(role)
            .map(|procedures| {
                procedures
                    .iter()
                    .map(|p| PolicyTuple::new(role, p.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every role holding at least one tuple, ordered by name.
    pub fn roles(&self) -> Vec<Role> {
        self.grants.keys().map(|r| Role::from(r.as_str())).collect()
    }

    pub fn len(&self) -> usize {
        self.grants.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> RbacModel {
        RbacModel::from_tuples(&[
            PolicyTuple::new("admin", "user.v1.UserService/FindAllUsers"),
            PolicyTuple::new("admin", "user.v1.UserService/DeleteUser"),
            PolicyTuple::new("user", "user.v1.UserService/FindAllUsers"),
        ])
    }

    #[test]
    fn enforce_matches_exact_tuples_only() {
        let m = model();
        assert!(m.enforce("admin", "user.v1.UserService/DeleteUser"));
        assert!(m.enforce("user", "user.v1.UserService/FindAllUsers"));
        assert!(!m.enforce("user", "user.v1.UserService/DeleteUser"));
        assert!(!m.enforce("guest", "user.v1.UserService/FindAllUsers"));
    }

    #[test]
    fn empty_role_is_denied() {
        let mut m = model();
        m.insert(&PolicyTuple::new("", "user.v1.UserService/FindAllUsers"));
        assert!(!m.enforce("", "user.v1.UserService/FindAllUsers"));
    }

    #[test]
    fn effective_set_is_union_of_tuples() {
        let m = model();
        let procedures: Vec<_> = m.filtered("admin").into_iter().map(|t| t.procedure).collect();
        assert_eq!(
            procedures,
            vec![
                "user.v1.UserService/DeleteUser".to_string(),
                "user.v1.UserService/FindAllUsers".to_string(),
            ]
        );
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn removing_last_tuple_drops_role() {
        let mut m = model();
        assert!(m.remove(&PolicyTuple::new("user", "user.v1.UserService/FindAllUsers")));
        assert!(!m.remove(&PolicyTuple::new("user", "user.v1.UserService/FindAllUsers")));
        assert_eq!(m.roles(), vec![Role::new("admin")]);
    }

    #[test]
    fn insert_reports_duplicates() {
        let mut m = model();
        assert!(!m.insert(&PolicyTuple::new("admin", "user.v1.UserService/DeleteUser")));
        assert!(m.insert(&PolicyTuple::new("auditor", "audit.v1.AuditService/List")));
        assert!(m.enforce("auditor", "audit.v1.AuditService/List"));
    }
}
