//! Role-based permission checks.
//!
//! The boolean gate never materializes permission rows; hydrating lookups
//! are batched so the query count stays constant regardless of role-set
//! size.

use std::sync::Arc;

use sentra_core::{PermissionId, RoleId};

use crate::model::{Permission, Role};
use crate::store::{RoleStore, StoreError};

pub struct RbacEvaluator {
    roles: Arc<dyn RoleStore>,
}

impl RbacEvaluator {
    pub fn new(roles: Arc<dyn RoleStore>) -> Self {
        Self { roles }
    }

    /// Does this role-id set grant this permission name?
    ///
    /// An empty role set short-circuits to `false` without touching the
    /// store; otherwise this is a single existence query.
    pub async fn has_permission(
        &self,
        permission: &str,
        role_ids: &[RoleId],
    ) -> Result<bool, StoreError> {
        if role_ids.is_empty() {
            return Ok(false);
        }
        self.roles
            .exists_permission_for_roles(permission, role_ids)
            .await
    }

    /// Full permission rows granted by a role set: permission ids for all
    /// roles in one call, then permission rows in one call. Two queries
    /// total regardless of role-set size.
    pub async fn permissions_for_roles(
        &self,
        role_ids: &[RoleId],
    ) -> Result<Vec<Permission>, StoreError> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let pairs = self.roles.find_permission_ids_by_role_ids(role_ids).await?;
        let mut permission_ids: Vec<PermissionId> = pairs.into_iter().map(|(_, p)| p).collect();
        permission_ids.sort();
        permission_ids.dedup();
        if permission_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.roles.find_permissions_by_ids(&permission_ids).await
    }

    /// Hydrated role rows for a role-id set (one call).
    pub async fn roles_by_ids(&self, role_ids: &[RoleId]) -> Result<Vec<Role>, StoreError> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.roles.find_roles_by_ids(role_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoleAssignment;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sentra_core::UserId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Role store that refuses to serve anything; checks against it must
    /// short-circuit before querying.
    #[derive(Default)]
    struct UntouchableRoleStore {
        queries: AtomicUsize,
    }

    impl UntouchableRoleStore {
        fn touched(&self) -> bool {
            self.queries.load(Ordering::SeqCst) > 0
        }
    }

    #[async_trait]
    impl RoleStore for UntouchableRoleStore {
        async fn find_permission_by_name(
            &self,
            _name: &str,
        ) -> Result<Option<Permission>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn exists_permission_for_roles(
            &self,
            _name: &str,
            _role_ids: &[RoleId],
        ) -> Result<bool, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }

        async fn find_roles_by_ids(&self, _ids: &[RoleId]) -> Result<Vec<Role>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn find_permission_ids_by_role_ids(
            &self,
            _ids: &[RoleId],
        ) -> Result<Vec<(RoleId, PermissionId)>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn find_permissions_by_ids(
            &self,
            _ids: &[PermissionId],
        ) -> Result<Vec<Permission>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn find_valid_direct_assignments(
            &self,
            _user_id: UserId,
            _now: DateTime<Utc>,
        ) -> Result<Vec<RoleAssignment>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn empty_role_set_denies_without_querying() {
        let store = Arc::new(UntouchableRoleStore::default());
        let rbac = RbacEvaluator::new(store.clone());

        let allowed = rbac.has_permission("docs:read", &[]).await.unwrap();
        assert!(!allowed);
        assert!(!store.touched());
    }

    #[tokio::test]
    async fn empty_role_set_hydrates_nothing_without_querying() {
        let store = Arc::new(UntouchableRoleStore::default());
        let rbac = RbacEvaluator::new(store.clone());

        assert!(rbac.permissions_for_roles(&[]).await.unwrap().is_empty());
        assert!(rbac.roles_by_ids(&[]).await.unwrap().is_empty());
        assert!(!store.touched());
    }

    #[tokio::test]
    async fn non_empty_role_set_issues_one_existence_query() {
        let store = Arc::new(UntouchableRoleStore::default());
        let rbac = RbacEvaluator::new(store.clone());

        let allowed = rbac
            .has_permission("docs:read", &[RoleId::new(), RoleId::new()])
            .await
            .unwrap();
        assert!(!allowed);
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
    }
}
