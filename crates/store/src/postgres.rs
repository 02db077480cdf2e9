//! Postgres-backed store implementation.
//!
//! Read paths mirror the engine's batch contracts: id-set lookups use
//! `= ANY($n)` array binds so one call stays one round trip. The audit sink
//! is a plain append into an insert-only table.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE roles (
//!     id uuid PRIMARY KEY,
//!     name text NOT NULL UNIQUE
//! );
//! CREATE TABLE permissions (
//!     id uuid PRIMARY KEY,
//!     name text NOT NULL UNIQUE
//! );
//! CREATE TABLE role_permissions (
//!     role_id uuid NOT NULL REFERENCES roles (id),
//!     permission_id uuid NOT NULL REFERENCES permissions (id),
//!     PRIMARY KEY (role_id, permission_id)
//! );
//! CREATE TABLE group_memberships (
//!     user_id uuid NOT NULL,
//!     group_id uuid NOT NULL,
//!     membership_type text NOT NULL DEFAULT 'member',
//!     valid_until timestamptz
//! );
//! CREATE TABLE group_role_assignments (
//!     group_id uuid NOT NULL,
//!     role_id uuid NOT NULL REFERENCES roles (id),
//!     valid_until timestamptz
//! );
//! CREATE TABLE role_assignments (
//!     user_id uuid NOT NULL,
//!     role_id uuid NOT NULL REFERENCES roles (id),
//!     scope_type text NOT NULL DEFAULT 'global',
//!     scope_id uuid,
//!     valid_from timestamptz,
//!     valid_until timestamptz
//! );
//! CREATE TABLE abac_policies (
//!     id uuid PRIMARY KEY,
//!     name text NOT NULL UNIQUE,
//!     effect text NOT NULL,
//!     active boolean NOT NULL DEFAULT true,
//!     conditions jsonb NOT NULL DEFAULT '[]'
//! );
//! CREATE TABLE service_principals (
//!     id uuid PRIMARY KEY,
//!     external_id text NOT NULL UNIQUE,
//!     enabled boolean NOT NULL DEFAULT true
//! );
//! CREATE TABLE principal_permissions (
//!     principal_id uuid NOT NULL REFERENCES service_principals (id),
//!     permission_id uuid NOT NULL REFERENCES permissions (id),
//!     resource_pattern text
//! );
//! CREATE TABLE authorization_audit (
//!     id bigserial PRIMARY KEY,
//!     requested_action text NOT NULL,
//!     final_decision boolean NOT NULL,
//!     record jsonb NOT NULL,
//!     created_at timestamptz NOT NULL DEFAULT now()
//! );
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use sentra_core::{
    GroupId, PermissionId, PolicyId, RoleId, ServicePrincipalId, UserId,
};
use sentra_engine::abac::{AbacPolicy, PolicyEffect};
use sentra_engine::audit::AuditRecord;
use sentra_engine::model::{
    GroupMembership, GroupRoleAssignment, MembershipType, Permission, Role, RoleAssignment,
    ScopeType, ServicePrincipal, grant_pattern_matches,
};
use sentra_engine::store::{
    AuditSink, GroupStore, PolicyStore, PrincipalStore, RoleStore, StoreError,
};

fn map_sqlx_error(operation: &str, error: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{operation}: {error}"))
}

fn decode_error(operation: &str, error: impl std::fmt::Display) -> StoreError {
    StoreError::Decode(format!("{operation}: {error}"))
}

fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

/// Postgres-backed implementation of every read contract the engine
/// consumes.
///
/// Uses the SQLx connection pool, which is thread-safe; all operations are
/// single read statements with no cross-statement state.
#[derive(Debug, Clone)]
pub struct PostgresAuthStore {
    pool: Arc<PgPool>,
}

impl PostgresAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn permission_from_row(row: &sqlx::postgres::PgRow) -> Result<Permission, StoreError> {
        Ok(Permission {
            id: PermissionId::from_uuid(
                row.try_get("id").map_err(|e| decode_error("permission.id", e))?,
            ),
            name: row
                .try_get("name")
                .map_err(|e| decode_error("permission.name", e))?,
        })
    }

    fn role_from_row(row: &sqlx::postgres::PgRow) -> Result<Role, StoreError> {
        Ok(Role {
            id: RoleId::from_uuid(row.try_get("id").map_err(|e| decode_error("role.id", e))?),
            name: row
                .try_get("name")
                .map_err(|e| decode_error("role.name", e))?,
        })
    }

    fn membership_type_from_str(raw: &str) -> Result<MembershipType, StoreError> {
        match raw {
            "member" => Ok(MembershipType::Member),
            "owner" => Ok(MembershipType::Owner),
            other => Err(decode_error(
                "group_membership.membership_type",
                format!("unknown value '{other}'"),
            )),
        }
    }

    fn scope_type_from_str(raw: &str) -> Result<ScopeType, StoreError> {
        match raw {
            "global" => Ok(ScopeType::Global),
            "organization" => Ok(ScopeType::Organization),
            "project" => Ok(ScopeType::Project),
            other => Err(decode_error(
                "role_assignment.scope_type",
                format!("unknown value '{other}'"),
            )),
        }
    }

    fn policy_effect_from_str(raw: &str) -> Result<PolicyEffect, StoreError> {
        match raw {
            "allow" => Ok(PolicyEffect::Allow),
            "deny" => Ok(PolicyEffect::Deny),
            other => Err(decode_error(
                "abac_policy.effect",
                format!("unknown value '{other}'"),
            )),
        }
    }
}

#[async_trait]
impl RoleStore for PostgresAuthStore {
    #[instrument(skip(self))]
    async fn find_permission_by_name(&self, name: &str) -> Result<Option<Permission>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM permissions WHERE name = $1")
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_permission_by_name", e))?;
        row.as_ref().map(Self::permission_from_row).transpose()
    }

    #[instrument(skip(self, role_ids), fields(roles = role_ids.len()))]
    async fn exists_permission_for_roles(
        &self,
        name: &str,
        role_ids: &[RoleId],
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM role_permissions rp
                JOIN permissions p ON p.id = rp.permission_id
                WHERE p.name = $1 AND rp.role_id = ANY($2)
            ) AS granted
            "#,
        )
        .bind(name)
        .bind(uuids(role_ids))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("exists_permission_for_roles", e))?;
        row.try_get("granted")
            .map_err(|e| decode_error("exists_permission_for_roles", e))
    }

    #[instrument(skip(self, ids), fields(roles = ids.len()))]
    async fn find_roles_by_ids(&self, ids: &[RoleId]) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM roles WHERE id = ANY($1) ORDER BY name")
            .bind(uuids(ids))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_roles_by_ids", e))?;
        rows.iter().map(Self::role_from_row).collect()
    }

    #[instrument(skip(self, ids), fields(roles = ids.len()))]
    async fn find_permission_ids_by_role_ids(
        &self,
        ids: &[RoleId],
    ) -> Result<Vec<(RoleId, PermissionId)>, StoreError> {
        let rows = sqlx::query(
            "SELECT role_id, permission_id FROM role_permissions WHERE role_id = ANY($1)",
        )
        .bind(uuids(ids))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_permission_ids_by_role_ids", e))?;

        rows.iter()
            .map(|row| {
                let role_id: Uuid = row
                    .try_get("role_id")
                    .map_err(|e| decode_error("role_permissions.role_id", e))?;
                let permission_id: Uuid = row
                    .try_get("permission_id")
                    .map_err(|e| decode_error("role_permissions.permission_id", e))?;
                Ok((
                    RoleId::from_uuid(role_id),
                    PermissionId::from_uuid(permission_id),
                ))
            })
            .collect()
    }

    #[instrument(skip(self, ids), fields(permissions = ids.len()))]
    async fn find_permissions_by_ids(
        &self,
        ids: &[PermissionId],
    ) -> Result<Vec<Permission>, StoreError> {
        let rows =
            sqlx::query("SELECT id, name FROM permissions WHERE id = ANY($1) ORDER BY name")
                .bind(uuids(ids))
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("find_permissions_by_ids", e))?;
        rows.iter().map(Self::permission_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn find_valid_direct_assignments(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, role_id, scope_type, scope_id, valid_from, valid_until
            FROM role_assignments
            WHERE user_id = $1
                AND (valid_from IS NULL OR valid_from <= $2)
                AND (valid_until IS NULL OR valid_until >= $2)
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_valid_direct_assignments", e))?;

        rows.iter()
            .map(|row| {
                let scope_type: String = row
                    .try_get("scope_type")
                    .map_err(|e| decode_error("role_assignment.scope_type", e))?;
                Ok(RoleAssignment {
                    user_id: UserId::from_uuid(
                        row.try_get("user_id")
                            .map_err(|e| decode_error("role_assignment.user_id", e))?,
                    ),
                    role_id: RoleId::from_uuid(
                        row.try_get("role_id")
                            .map_err(|e| decode_error("role_assignment.role_id", e))?,
                    ),
                    scope_type: Self::scope_type_from_str(&scope_type)?,
                    scope_id: row
                        .try_get("scope_id")
                        .map_err(|e| decode_error("role_assignment.scope_id", e))?,
                    valid_from: row
                        .try_get("valid_from")
                        .map_err(|e| decode_error("role_assignment.valid_from", e))?,
                    valid_until: row
                        .try_get("valid_until")
                        .map_err(|e| decode_error("role_assignment.valid_until", e))?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl GroupStore for PostgresAuthStore {
    #[instrument(skip(self))]
    async fn find_active_memberships(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupMembership>, StoreError> {
        self.find_active_memberships_batch(&[user_id], now).await
    }

    #[instrument(skip(self, user_ids), fields(users = user_ids.len()))]
    async fn find_active_memberships_batch(
        &self,
        user_ids: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupMembership>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, group_id, membership_type, valid_until
            FROM group_memberships
            WHERE user_id = ANY($1)
                AND (valid_until IS NULL OR valid_until >= $2)
            "#,
        )
        .bind(uuids(user_ids))
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_active_memberships_batch", e))?;

        rows.iter()
            .map(|row| {
                let membership_type: String = row
                    .try_get("membership_type")
                    .map_err(|e| decode_error("group_membership.membership_type", e))?;
                Ok(GroupMembership {
                    user_id: UserId::from_uuid(
                        row.try_get("user_id")
                            .map_err(|e| decode_error("group_membership.user_id", e))?,
                    ),
                    group_id: GroupId::from_uuid(
                        row.try_get("group_id")
                            .map_err(|e| decode_error("group_membership.group_id", e))?,
                    ),
                    membership_type: Self::membership_type_from_str(&membership_type)?,
                    valid_until: row
                        .try_get("valid_until")
                        .map_err(|e| decode_error("group_membership.valid_until", e))?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, group_ids), fields(groups = group_ids.len()))]
    async fn find_active_role_assignments(
        &self,
        group_ids: &[GroupId],
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupRoleAssignment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT group_id, role_id, valid_until
            FROM group_role_assignments
            WHERE group_id = ANY($1)
                AND (valid_until IS NULL OR valid_until >= $2)
            "#,
        )
        .bind(uuids(group_ids))
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_active_role_assignments", e))?;

        rows.iter()
            .map(|row| {
                Ok(GroupRoleAssignment {
                    group_id: GroupId::from_uuid(
                        row.try_get("group_id")
                            .map_err(|e| decode_error("group_role_assignment.group_id", e))?,
                    ),
                    role_id: RoleId::from_uuid(
                        row.try_get("role_id")
                            .map_err(|e| decode_error("group_role_assignment.role_id", e))?,
                    ),
                    valid_until: row
                        .try_get("valid_until")
                        .map_err(|e| decode_error("group_role_assignment.valid_until", e))?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PrincipalStore for PostgresAuthStore {
    #[instrument(skip(self))]
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ServicePrincipal>, StoreError> {
        let row = sqlx::query(
            "SELECT id, external_id, enabled FROM service_principals WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_external_id", e))?;

        row.map(|row| {
            Ok(ServicePrincipal {
                id: ServicePrincipalId::from_uuid(
                    row.try_get("id")
                        .map_err(|e| decode_error("service_principal.id", e))?,
                ),
                external_id: row
                    .try_get("external_id")
                    .map_err(|e| decode_error("service_principal.external_id", e))?,
                enabled: row
                    .try_get("enabled")
                    .map_err(|e| decode_error("service_principal.enabled", e))?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn grant_exists(
        &self,
        principal_id: ServicePrincipalId,
        permission_id: PermissionId,
        resource_pattern: Option<&str>,
    ) -> Result<bool, StoreError> {
        // Pattern semantics (trailing `*` prefix match) live in the engine
        // helper, so the grant rows come back and match in process.
        let rows = sqlx::query(
            r#"
            SELECT resource_pattern
            FROM principal_permissions
            WHERE principal_id = $1 AND permission_id = $2
            "#,
        )
        .bind(principal_id.as_uuid())
        .bind(permission_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("grant_exists", e))?;

        for row in &rows {
            let pattern: Option<String> = row
                .try_get("resource_pattern")
                .map_err(|e| decode_error("principal_permission.resource_pattern", e))?;
            if grant_pattern_matches(pattern.as_deref(), resource_pattern) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl PolicyStore for PostgresAuthStore {
    #[instrument(skip(self))]
    async fn find_active_policies(&self) -> Result<Vec<AbacPolicy>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, effect, active, conditions
            FROM abac_policies
            WHERE active
            ORDER BY name
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_active_policies", e))?;

        rows.iter()
            .map(|row| {
                let effect: String = row
                    .try_get("effect")
                    .map_err(|e| decode_error("abac_policy.effect", e))?;
                let conditions: serde_json::Value = row
                    .try_get("conditions")
                    .map_err(|e| decode_error("abac_policy.conditions", e))?;
                Ok(AbacPolicy {
                    id: PolicyId::from_uuid(
                        row.try_get("id")
                            .map_err(|e| decode_error("abac_policy.id", e))?,
                    ),
                    name: row
                        .try_get("name")
                        .map_err(|e| decode_error("abac_policy.name", e))?,
                    effect: Self::policy_effect_from_str(&effect)?,
                    active: row
                        .try_get("active")
                        .map_err(|e| decode_error("abac_policy.active", e))?,
                    conditions: serde_json::from_value(conditions)
                        .map_err(|e| decode_error("abac_policy.conditions", e))?,
                })
            })
            .collect()
    }
}

/// Postgres-backed append-only audit sink.
///
/// The full record lands as one jsonb column; the action and final decision
/// are duplicated into indexed columns for querying.
#[derive(Debug, Clone)]
pub struct PostgresAuditSink {
    pool: Arc<PgPool>,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    #[instrument(skip(self, record), fields(action = %record.requested_action))]
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_value(&record)
            .map_err(|e| decode_error("audit_record.serialize", e))?;
        sqlx::query(
            r#"
            INSERT INTO authorization_audit (requested_action, final_decision, record, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&record.requested_action)
        .bind(record.final_decision)
        .bind(payload)
        .bind(record.timestamp)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("audit_append", e))?;
        Ok(())
    }
}
