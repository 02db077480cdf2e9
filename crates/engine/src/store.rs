//! Consumed store contracts.
//!
//! The engine treats persistence as a capability set: batch-shaped,
//! read-only lookups plus an append-only audit sink. The query shapes are
//! part of the contract: batch-by-id-set and existence-short-circuit keep
//! decision paths at a bounded number of round trips.
//! Implementations live in `sentra-store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use sentra_core::{GroupId, PermissionId, RoleId, ServicePrincipalId, UserId};

use crate::abac::AbacPolicy;
use crate::audit::AuditRecord;
use crate::model::{
    GroupMembership, GroupRoleAssignment, Permission, Role, RoleAssignment, ServicePrincipal,
};

/// Store operation error.
///
/// These are **infrastructure errors** (connectivity, decoding) as opposed
/// to authorization outcomes: a store failure propagates to the caller and
/// is never converted into an allow or deny.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("row decoding failed: {0}")]
    Decode(String),
}

/// Role and permission lookups.
///
/// All methods are batch-capable: callers pass the full id set they need and
/// implementations answer in one round trip per call.
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn find_permission_by_name(&self, name: &str)
    -> Result<Option<Permission>, StoreError>;

    /// Existence check only; implementations must not materialize
    /// permission rows to answer it.
    async fn exists_permission_for_roles(
        &self,
        name: &str,
        role_ids: &[RoleId],
    ) -> Result<bool, StoreError>;

    async fn find_roles_by_ids(&self, ids: &[RoleId]) -> Result<Vec<Role>, StoreError>;

    async fn find_permission_ids_by_role_ids(
        &self,
        ids: &[RoleId],
    ) -> Result<Vec<(RoleId, PermissionId)>, StoreError>;

    async fn find_permissions_by_ids(
        &self,
        ids: &[PermissionId],
    ) -> Result<Vec<Permission>, StoreError>;

    /// Direct (non-group) role assignments active at `now`. This is the
    /// separate lookup path for the asymmetric `RoleAssignment` entity; it
    /// does not feed group aggregation.
    async fn find_valid_direct_assignments(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>, StoreError>;
}

/// Group membership and group-role lookups, validity-window filtered.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn find_active_memberships(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupMembership>, StoreError>;

    async fn find_active_memberships_batch(
        &self,
        user_ids: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupMembership>, StoreError>;

    async fn find_active_role_assignments(
        &self,
        group_ids: &[GroupId],
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupRoleAssignment>, StoreError>;
}

/// Machine principal records and their permission grants.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ServicePrincipal>, StoreError>;

    async fn grant_exists(
        &self,
        principal_id: ServicePrincipalId,
        permission_id: PermissionId,
        resource_pattern: Option<&str>,
    ) -> Result<bool, StoreError>;
}

/// Attribute-based policy lookups.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All currently-active policies, ordered by name for deterministic
    /// evaluation.
    async fn find_active_policies(&self) -> Result<Vec<AbacPolicy>, StoreError>;
}

/// Append-only audit trail.
///
/// Implementations must not silently drop records: a failed append surfaces
/// as an error, which the orchestrator reports distinctly from both denials
/// and store read failures.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError>;
}
