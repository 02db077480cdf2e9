//! In-memory store.
//!
//! Intended for tests/dev. Not optimized for performance. Seeding goes
//! through the `add_*`/`insert_*` methods; the engine itself only reads.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sentra_core::{GroupId, PermissionId, RoleId, ServicePrincipalId, UserId};
use sentra_engine::abac::AbacPolicy;
use sentra_engine::audit::AuditRecord;
use sentra_engine::model::{
    GroupMembership, GroupRoleAssignment, MembershipType, Permission, Role, RoleAssignment,
    ScopeType, ServicePrincipal, grant_pattern_matches,
};
use sentra_engine::store::{
    AuditSink, GroupStore, PolicyStore, PrincipalStore, RoleStore, StoreError,
};

#[derive(Debug, Default)]
struct Inner {
    roles: HashMap<RoleId, Role>,
    permissions: HashMap<PermissionId, Permission>,
    role_permissions: Vec<(RoleId, PermissionId)>,
    memberships: Vec<GroupMembership>,
    group_role_assignments: Vec<GroupRoleAssignment>,
    direct_assignments: Vec<RoleAssignment>,
    policies: Vec<AbacPolicy>,
    principals: HashMap<ServicePrincipalId, ServicePrincipal>,
    grants: Vec<(ServicePrincipalId, PermissionId, Option<String>)>,
}

/// In-memory implementation of every read contract the engine consumes.
#[derive(Debug, Default)]
pub struct InMemoryAuthStore {
    inner: RwLock<Inner>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        // Seeding mutators are infallible; a poisoned lock just means a
        // writer panicked mid-push, and the map is still usable.
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Seeding (management operations live outside the engine)
    // ─────────────────────────────────────────────────────────────────────

    pub fn insert_role(&self, name: impl Into<String>) -> RoleId {
        let role = Role {
            id: RoleId::new(),
            name: name.into(),
        };
        let id = role.id;
        self.write().roles.insert(id, role);
        id
    }

    pub fn insert_permission(&self, name: impl Into<String>) -> PermissionId {
        let permission = Permission {
            id: PermissionId::new(),
            name: name.into(),
        };
        let id = permission.id;
        self.write().permissions.insert(id, permission);
        id
    }

    pub fn grant_permission_to_role(&self, role_id: RoleId, permission_id: PermissionId) {
        self.write().role_permissions.push((role_id, permission_id));
    }

    pub fn add_membership(
        &self,
        user_id: UserId,
        group_id: GroupId,
        valid_until: Option<DateTime<Utc>>,
    ) {
        self.write().memberships.push(GroupMembership {
            user_id,
            group_id,
            membership_type: MembershipType::Member,
            valid_until,
        });
    }

    pub fn remove_memberships(&self, user_id: UserId, group_id: GroupId) {
        self.write()
            .memberships
            .retain(|m| !(m.user_id == user_id && m.group_id == group_id));
    }

    pub fn add_group_role(
        &self,
        group_id: GroupId,
        role_id: RoleId,
        valid_until: Option<DateTime<Utc>>,
    ) {
        self.write().group_role_assignments.push(GroupRoleAssignment {
            group_id,
            role_id,
            valid_until,
        });
    }

    pub fn add_direct_assignment(
        &self,
        user_id: UserId,
        role_id: RoleId,
        scope_type: ScopeType,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) {
        self.write().direct_assignments.push(RoleAssignment {
            user_id,
            role_id,
            scope_type,
            scope_id: None,
            valid_from,
            valid_until,
        });
    }

    pub fn add_policy(&self, policy: AbacPolicy) {
        self.write().policies.push(policy);
    }

    pub fn add_service_principal(
        &self,
        external_id: impl Into<String>,
        enabled: bool,
    ) -> ServicePrincipalId {
        let principal = ServicePrincipal {
            id: ServicePrincipalId::new(),
            external_id: external_id.into(),
            enabled,
        };
        let id = principal.id;
        self.write().principals.insert(id, principal);
        id
    }

    pub fn add_grant(
        &self,
        principal_id: ServicePrincipalId,
        permission_id: PermissionId,
        resource_pattern: Option<String>,
    ) {
        self.write()
            .grants
            .push((principal_id, permission_id, resource_pattern));
    }
}

#[async_trait]
impl RoleStore for InMemoryAuthStore {
    async fn find_permission_by_name(&self, name: &str) -> Result<Option<Permission>, StoreError> {
        let inner = self.read()?;
        Ok(inner.permissions.values().find(|p| p.name == name).cloned())
    }

    async fn exists_permission_for_roles(
        &self,
        name: &str,
        role_ids: &[RoleId],
    ) -> Result<bool, StoreError> {
        let inner = self.read()?;
        let Some(permission) = inner.permissions.values().find(|p| p.name == name) else {
            return Ok(false);
        };
        Ok(inner
            .role_permissions
            .iter()
            .any(|(r, p)| *p == permission.id && role_ids.contains(r)))
    }

    async fn find_roles_by_ids(&self, ids: &[RoleId]) -> Result<Vec<Role>, StoreError> {
        let inner = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.roles.get(id).cloned())
            .collect())
    }

    async fn find_permission_ids_by_role_ids(
        &self,
        ids: &[RoleId],
    ) -> Result<Vec<(RoleId, PermissionId)>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .role_permissions
            .iter()
            .filter(|(r, _)| ids.contains(r))
            .copied()
            .collect())
    }

    async fn find_permissions_by_ids(
        &self,
        ids: &[PermissionId],
    ) -> Result<Vec<Permission>, StoreError> {
        let inner = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.permissions.get(id).cloned())
            .collect())
    }

    async fn find_valid_direct_assignments(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .direct_assignments
            .iter()
            .filter(|a| a.user_id == user_id && a.is_active(now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GroupStore for InMemoryAuthStore {
    async fn find_active_memberships(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupMembership>, StoreError> {
        self.find_active_memberships_batch(&[user_id], now).await
    }

    async fn find_active_memberships_batch(
        &self,
        user_ids: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupMembership>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .memberships
            .iter()
            .filter(|m| user_ids.contains(&m.user_id) && m.is_active(now))
            .cloned()
            .collect())
    }

    async fn find_active_role_assignments(
        &self,
        group_ids: &[GroupId],
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupRoleAssignment>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .group_role_assignments
            .iter()
            .filter(|a| group_ids.contains(&a.group_id) && a.is_active(now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PrincipalStore for InMemoryAuthStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ServicePrincipal>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .principals
            .values()
            .find(|p| p.external_id == external_id)
            .cloned())
    }

    async fn grant_exists(
        &self,
        principal_id: ServicePrincipalId,
        permission_id: PermissionId,
        resource_pattern: Option<&str>,
    ) -> Result<bool, StoreError> {
        let inner = self.read()?;
        Ok(inner.grants.iter().any(|(pr, pe, pattern)| {
            *pr == principal_id
                && *pe == permission_id
                && grant_pattern_matches(pattern.as_deref(), resource_pattern)
        }))
    }
}

#[async_trait]
impl PolicyStore for InMemoryAuthStore {
    async fn find_active_policies(&self) -> Result<Vec<AbacPolicy>, StoreError> {
        let inner = self.read()?;
        let mut policies: Vec<AbacPolicy> = inner
            .policies
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect();
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(policies)
    }
}

/// In-memory append-only audit sink.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far, in append order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn role_permission_lookups() {
        let store = InMemoryAuthStore::new();
        let role = store.insert_role("editor");
        let read = store.insert_permission("docs:read");
        let write = store.insert_permission("docs:write");
        store.grant_permission_to_role(role, read);
        store.grant_permission_to_role(role, write);

        assert!(
            store
                .exists_permission_for_roles("docs:read", &[role])
                .await
                .unwrap()
        );
        assert!(
            !store
                .exists_permission_for_roles("docs:delete", &[role])
                .await
                .unwrap()
        );
        assert!(
            !store
                .exists_permission_for_roles("docs:read", &[RoleId::new()])
                .await
                .unwrap()
        );

        let pairs = store
            .find_permission_ids_by_role_ids(&[role])
            .await
            .unwrap();
        assert_eq!(pairs.len(), 2);

        let named = store.find_permission_by_name("docs:write").await.unwrap();
        assert_eq!(named.unwrap().id, write);
    }

    #[tokio::test]
    async fn membership_queries_filter_validity() {
        let now = Utc::now();
        let store = InMemoryAuthStore::new();
        let (user, group_live, group_dead) = (UserId::new(), GroupId::new(), GroupId::new());
        store.add_membership(user, group_live, None);
        store.add_membership(user, group_dead, Some(now - Duration::hours(1)));

        let active = store.find_active_memberships(user, now).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].group_id, group_live);
    }

    #[tokio::test]
    async fn direct_assignments_honor_valid_from() {
        let now = Utc::now();
        let store = InMemoryAuthStore::new();
        let (user, role) = (UserId::new(), RoleId::new());
        store.add_direct_assignment(
            user,
            role,
            ScopeType::Global,
            Some(now + Duration::hours(1)),
            None,
        );

        let active = store
            .find_valid_direct_assignments(user, now)
            .await
            .unwrap();
        assert!(active.is_empty(), "future-dated grant not yet active");
    }

    #[tokio::test]
    async fn grants_match_exact_and_prefix_patterns() {
        let store = InMemoryAuthStore::new();
        let principal = store.add_service_principal("reporting-batch", true);
        let permission = store.insert_permission("reports:export");
        store.add_grant(principal, permission, Some("reports/*".to_string()));

        assert!(
            store
                .grant_exists(principal, permission, Some("reports/q3"))
                .await
                .unwrap()
        );
        assert!(
            !store
                .grant_exists(principal, permission, Some("invoices/q3"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn active_policies_come_back_name_ordered() {
        use sentra_engine::abac::{AbacPolicy, PolicyEffect};
        use sentra_core::PolicyId;

        let store = InMemoryAuthStore::new();
        for name in ["zulu", "alpha", "mike"] {
            store.add_policy(AbacPolicy {
                id: PolicyId::new(),
                name: name.to_string(),
                effect: PolicyEffect::Allow,
                active: true,
                conditions: vec![],
            });
        }
        store.add_policy(AbacPolicy {
            id: PolicyId::new(),
            name: "inactive".to_string(),
            effect: PolicyEffect::Deny,
            active: false,
            conditions: vec![],
        });

        let names: Vec<String> = store
            .find_active_policies()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["alpha", "mike", "zulu"]);
    }
}
