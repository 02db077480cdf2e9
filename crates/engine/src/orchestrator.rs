//! Two-stage decision combination and principal routing.
//!
//! The orchestrator fetches a user's role/group context once, runs the RBAC
//! gate, and only on an RBAC allow evaluates the attribute-policy layer. An
//! explicit ABAC deny overrides the RBAC allow; no matching policy defers
//! to the RBAC result. Machine principals go through the independent
//! service-grant path, and a propagated user on a service token requires
//! both sides to allow.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error};

use sentra_core::{GroupId, PermissionId, RoleId, UserId};

use crate::abac::{AbacEvaluator, PolicyDecision, PolicyRef};
use crate::aggregator::RoleAggregator;
use crate::attributes::{AttributeMap, DecisionContext, resource_attributes};
use crate::audit::{AbacOutcome, AuditMetadata, AuditPrincipal, AuditRecord, RbacOutcome};
use crate::model::{Permission, Role, RoleAssignment};
use crate::principal::Principal;
use crate::rbac::RbacEvaluator;
use crate::store::{AuditSink, GroupStore, PolicyStore, PrincipalStore, RoleStore, StoreError};

/// The outcome of a permission check. An ordinary denial is a value, never
/// an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub allowed: bool,
    pub reason: String,
}

impl AuthorizationResult {
    fn allowed(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Engine failure modes.
///
/// `Denied` is raised only by [`AuthorizationEngine::require_permission`];
/// the `check_*` entry points return denials as values. Store and audit
/// failures are infrastructure errors, kept distinct so losing an audit row
/// is never mistaken for an access decision.
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("access denied: {0}")]
    Denied(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("audit append failed: {0}")]
    Audit(StoreError),
}

/// Optional inputs to a permission check.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub subject_attributes: Option<AttributeMap>,
    pub resource_attributes: Option<AttributeMap>,
    pub context_attributes: Option<AttributeMap>,
}

impl CheckOptions {
    pub fn for_resource(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            resource_id: Some(resource_id.into()),
            ..Self::default()
        }
    }
}

/// Outcome of the (non-auditing) user evaluation helper.
struct UserEvaluation {
    allowed: bool,
    reason: String,
    rbac: RbacOutcome,
    abac: AbacOutcome,
    group_ids: Vec<GroupId>,
    role_ids: Vec<RoleId>,
    matched: Vec<PolicyRef>,
}

/// Outcome of the (non-auditing) service evaluation helper.
struct ServiceEvaluation {
    allowed: bool,
    reason: String,
}

/// Top-level authorization entry point.
///
/// Stateless between calls: decisions read the stores and append one audit
/// record, nothing else, so independent checks are safe to run
/// concurrently.
pub struct AuthorizationEngine {
    aggregator: RoleAggregator,
    rbac: RbacEvaluator,
    abac: AbacEvaluator,
    roles: Arc<dyn RoleStore>,
    principals: Arc<dyn PrincipalStore>,
    audit: Arc<dyn AuditSink>,
}

impl AuthorizationEngine {
    pub fn new(
        roles: Arc<dyn RoleStore>,
        groups: Arc<dyn GroupStore>,
        principals: Arc<dyn PrincipalStore>,
        policies: Arc<dyn PolicyStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            aggregator: RoleAggregator::new(groups),
            rbac: RbacEvaluator::new(Arc::clone(&roles)),
            abac: AbacEvaluator::new(policies),
            roles,
            principals,
            audit,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Check entry points (each audits exactly once)
    // ─────────────────────────────────────────────────────────────────────

    /// Check a user's permission, routing through RBAC then ABAC.
    pub async fn check_user_permission(
        &self,
        user_id: UserId,
        permission: &str,
        opts: &CheckOptions,
    ) -> Result<AuthorizationResult, AuthzError> {
        let now = Utc::now();
        let evaluation = self.evaluate_user(user_id, permission, opts, now).await?;

        self.append_audit(AuditRecord {
            principal: AuditPrincipal::User { user_id },
            groups: evaluation.group_ids.clone(),
            role_ids: evaluation.role_ids.clone(),
            requested_action: permission.to_string(),
            resource_type: opts.resource_type.clone(),
            resource_id: opts.resource_id.clone(),
            rbac_result: evaluation.rbac,
            abac_result: evaluation.abac,
            final_decision: evaluation.allowed,
            metadata: AuditMetadata::UserCheck {
                matched_policies: evaluation.matched.clone(),
            },
            timestamp: now,
        })
        .await?;

        debug!(
            %user_id,
            permission,
            allowed = evaluation.allowed,
            "user authorization decision"
        );
        Ok(AuthorizationResult {
            allowed: evaluation.allowed,
            reason: evaluation.reason,
        })
    }

    /// Check a machine principal's grant. Independent of the role graph:
    /// grants live in their own `principal_permissions` relation.
    pub async fn check_service_permission(
        &self,
        service_id: &str,
        permission: &str,
        resource_pattern: Option<&str>,
    ) -> Result<AuthorizationResult, AuthzError> {
        let now = Utc::now();
        let evaluation = self
            .evaluate_service(service_id, permission, resource_pattern)
            .await?;

        self.append_audit(AuditRecord {
            principal: AuditPrincipal::Service {
                service_id: service_id.to_string(),
            },
            groups: Vec::new(),
            role_ids: Vec::new(),
            requested_action: permission.to_string(),
            resource_type: None,
            resource_id: None,
            rbac_result: if evaluation.allowed {
                RbacOutcome::Allowed
            } else {
                RbacOutcome::Denied
            },
            abac_result: AbacOutcome::NotEvaluated,
            final_decision: evaluation.allowed,
            metadata: AuditMetadata::ServiceCheck {
                resource_pattern: resource_pattern.map(str::to_string),
            },
            timestamp: now,
        })
        .await?;

        debug!(
            service_id,
            permission,
            allowed = evaluation.allowed,
            "service authorization decision"
        );
        Ok(AuthorizationResult {
            allowed: evaluation.allowed,
            reason: evaluation.reason,
        })
    }

    /// Check any principal, routing by variant. A service principal with a
    /// propagated user must satisfy **both** the service grant and the
    /// propagated user's own permission; the service failure is reported
    /// first and the user path is skipped entirely when it occurs.
    pub async fn check_permission(
        &self,
        principal: &Principal,
        permission: &str,
        opts: &CheckOptions,
    ) -> Result<AuthorizationResult, AuthzError> {
        match principal {
            Principal::User { user_id } => {
                self.check_user_permission(*user_id, permission, opts).await
            }
            Principal::Service {
                service_id,
                propagated: None,
            } => {
                self.check_service_permission(service_id, permission, None)
                    .await
            }
            Principal::Service {
                service_id,
                propagated: Some(propagated),
            } => {
                self.check_dual(service_id, propagated.user_id, permission, opts)
                    .await
            }
        }
    }

    /// Same evaluation as [`check_permission`], raising
    /// [`AuthzError::Denied`] instead of returning a negative result.
    ///
    /// The raised message carries the permission name and engine reason but
    /// never the resource identifiers; callers needing those have the audit
    /// record.
    ///
    /// [`check_permission`]: AuthorizationEngine::check_permission
    pub async fn require_permission(
        &self,
        principal: &Principal,
        permission: &str,
        opts: &CheckOptions,
    ) -> Result<(), AuthzError> {
        let result = self.check_permission(principal, permission, opts).await?;
        if result.allowed {
            Ok(())
        } else {
            Err(AuthzError::Denied(result.reason))
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Read-only role/permission views (no audit)
    // ─────────────────────────────────────────────────────────────────────

    /// Hydrated roles a user currently holds through group membership.
    pub async fn user_roles(&self, user_id: UserId) -> Result<Vec<Role>, StoreError> {
        let role_ids = self
            .aggregator
            .effective_role_ids(user_id, Utc::now())
            .await?;
        let role_ids: Vec<RoleId> = role_ids.into_iter().collect();
        self.rbac.roles_by_ids(&role_ids).await
    }

    /// Hydrated permissions a user currently holds through group membership.
    pub async fn user_permissions(&self, user_id: UserId) -> Result<Vec<Permission>, StoreError> {
        let role_ids = self
            .aggregator
            .effective_role_ids(user_id, Utc::now())
            .await?;
        let role_ids: Vec<RoleId> = role_ids.into_iter().collect();
        self.rbac.permissions_for_roles(&role_ids).await
    }

    /// Batch role view: bounded store calls regardless of user count.
    pub async fn user_roles_batch(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, Vec<Role>>, StoreError> {
        let roles_by_user = self
            .aggregator
            .effective_role_ids_batch(user_ids, Utc::now())
            .await?;

        let mut all_role_ids: Vec<RoleId> =
            roles_by_user.values().flatten().copied().collect();
        all_role_ids.sort();
        all_role_ids.dedup();

        let roles = self.rbac.roles_by_ids(&all_role_ids).await?;
        let by_id: HashMap<RoleId, &Role> = roles.iter().map(|r| (r.id, r)).collect();

        Ok(roles_by_user
            .into_iter()
            .map(|(user, role_ids)| {
                let hydrated = role_ids
                    .iter()
                    .filter_map(|id| by_id.get(id).map(|r| (*r).clone()))
                    .collect();
                (user, hydrated)
            })
            .collect())
    }

    /// Batch permission view: permission ids for all roles in one call,
    /// permission rows in one call.
    pub async fn user_permissions_batch(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, Vec<Permission>>, StoreError> {
        let roles_by_user = self
            .aggregator
            .effective_role_ids_batch(user_ids, Utc::now())
            .await?;

        let mut all_role_ids: Vec<RoleId> =
            roles_by_user.values().flatten().copied().collect();
        all_role_ids.sort();
        all_role_ids.dedup();

        let mut resolved: HashMap<UserId, Vec<Permission>> =
            user_ids.iter().map(|u| (*u, Vec::new())).collect();
        if all_role_ids.is_empty() {
            return Ok(resolved);
        }

        let pairs = self
            .roles
            .find_permission_ids_by_role_ids(&all_role_ids)
            .await?;
        let mut permission_ids: Vec<PermissionId> = pairs.iter().map(|(_, p)| *p).collect();
        permission_ids.sort();
        permission_ids.dedup();
        let permissions = self.roles.find_permissions_by_ids(&permission_ids).await?;
        let by_id: HashMap<PermissionId, &Permission> =
            permissions.iter().map(|p| (p.id, p)).collect();

        let mut permissions_by_role: HashMap<RoleId, Vec<PermissionId>> = HashMap::new();
        for (role_id, permission_id) in &pairs {
            permissions_by_role
                .entry(*role_id)
                .or_default()
                .push(*permission_id);
        }

        for (user, role_ids) in &roles_by_user {
            let mut seen: BTreeSet<PermissionId> = BTreeSet::new();
            for role_id in role_ids {
                if let Some(ids) = permissions_by_role.get(role_id) {
                    seen.extend(ids.iter().copied());
                }
            }
            let hydrated = seen
                .iter()
                .filter_map(|id| by_id.get(id).map(|p| (*p).clone()))
                .collect();
            resolved.insert(*user, hydrated);
        }

        Ok(resolved)
    }

    /// Direct (non-group) role assignments active now. Separate lookup path
    /// for the asymmetric `RoleAssignment` entity.
    pub async fn direct_role_assignments(
        &self,
        user_id: UserId,
    ) -> Result<Vec<RoleAssignment>, StoreError> {
        self.roles
            .find_valid_direct_assignments(user_id, Utc::now())
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internal evaluation helpers (never audit on their own)
    // ─────────────────────────────────────────────────────────────────────

    async fn evaluate_user(
        &self,
        user_id: UserId,
        permission: &str,
        opts: &CheckOptions,
        now: DateTime<Utc>,
    ) -> Result<UserEvaluation, StoreError> {
        // One context fetch, shared by the RBAC gate and the ABAC
        // attribute-building step.
        let group_context = self.aggregator.group_context(user_id, now).await?;
        let role_ids: Vec<RoleId> = group_context.role_ids.iter().copied().collect();

        if role_ids.is_empty() {
            return Ok(UserEvaluation {
                allowed: false,
                reason: format!(
                    "User does not have permission '{permission}' (no roles assigned)"
                ),
                rbac: RbacOutcome::Denied,
                abac: AbacOutcome::NotEvaluated,
                group_ids: group_context.group_ids,
                role_ids,
                matched: Vec::new(),
            });
        }

        if !self.rbac.has_permission(permission, &role_ids).await? {
            // RBAC denied: ABAC must not run.
            return Ok(UserEvaluation {
                allowed: false,
                reason: format!("User does not have permission '{permission}'"),
                rbac: RbacOutcome::Denied,
                abac: AbacOutcome::NotEvaluated,
                group_ids: group_context.group_ids,
                role_ids,
                matched: Vec::new(),
            });
        }

        let roles = self.rbac.roles_by_ids(&role_ids).await?;
        let context = DecisionContext {
            user_id,
            group_ids: group_context.group_ids,
            role_ids,
            roles,
        };
        let subject = context.subject_attributes(opts.subject_attributes.as_ref());
        let resource = resource_attributes(
            opts.resource_type.as_deref(),
            opts.resource_id.as_deref(),
            opts.resource_attributes.as_ref(),
        );
        let verdict = self
            .abac
            .evaluate(&subject, resource.as_ref(), opts.context_attributes.as_ref())
            .await?;

        let (allowed, reason, abac) = match verdict.decision {
            Some(PolicyDecision::Deny) => (
                false,
                "Access denied: ABAC policy explicitly denies access".to_string(),
                AbacOutcome::Denied,
            ),
            Some(PolicyDecision::Allow) => (
                true,
                "Access granted: RBAC allowed, ABAC allowed".to_string(),
                AbacOutcome::Allowed,
            ),
            None => (
                true,
                "Access granted: RBAC allowed, no policies matched".to_string(),
                AbacOutcome::NoPolicyMatched,
            ),
        };

        Ok(UserEvaluation {
            allowed,
            reason,
            rbac: RbacOutcome::Allowed,
            abac,
            group_ids: context.group_ids,
            role_ids: context.role_ids,
            matched: verdict.matched,
        })
    }

    async fn evaluate_service(
        &self,
        service_id: &str,
        permission: &str,
        resource_pattern: Option<&str>,
    ) -> Result<ServiceEvaluation, StoreError> {
        let Some(principal) = self.principals.find_by_external_id(service_id).await? else {
            return Ok(ServiceEvaluation {
                allowed: false,
                reason: format!("Service principal '{service_id}' not found"),
            });
        };
        if !principal.enabled {
            return Ok(ServiceEvaluation {
                allowed: false,
                reason: format!("Service principal '{service_id}' is disabled"),
            });
        }
        let Some(permission_row) = self.roles.find_permission_by_name(permission).await? else {
            return Ok(ServiceEvaluation {
                allowed: false,
                reason: format!("Permission '{permission}' not found"),
            });
        };
        if self
            .principals
            .grant_exists(principal.id, permission_row.id, resource_pattern)
            .await?
        {
            Ok(ServiceEvaluation {
                allowed: true,
                reason: "Access granted: service grant matched".to_string(),
            })
        } else {
            Ok(ServiceEvaluation {
                allowed: false,
                reason: format!("Service '{service_id}' does not have permission '{permission}'"),
            })
        }
    }

    async fn check_dual(
        &self,
        service_id: &str,
        propagated_user: UserId,
        permission: &str,
        opts: &CheckOptions,
    ) -> Result<AuthorizationResult, AuthzError> {
        let now = Utc::now();
        let service = self.evaluate_service(service_id, permission, None).await?;

        if !service.allowed {
            // Service failure takes priority; the user path never runs.
            self.append_audit(AuditRecord {
                principal: AuditPrincipal::Service {
                    service_id: service_id.to_string(),
                },
                groups: Vec::new(),
                role_ids: Vec::new(),
                requested_action: permission.to_string(),
                resource_type: opts.resource_type.clone(),
                resource_id: opts.resource_id.clone(),
                rbac_result: RbacOutcome::Denied,
                abac_result: AbacOutcome::NotEvaluated,
                final_decision: false,
                metadata: AuditMetadata::DualCheck {
                    propagated_user,
                    service_allowed: false,
                    matched_policies: Vec::new(),
                },
                timestamp: now,
            })
            .await?;
            return Ok(AuthorizationResult::denied(service.reason));
        }

        let user = self
            .evaluate_user(propagated_user, permission, opts, now)
            .await?;

        self.append_audit(AuditRecord {
            principal: AuditPrincipal::Service {
                service_id: service_id.to_string(),
            },
            groups: user.group_ids.clone(),
            role_ids: user.role_ids.clone(),
            requested_action: permission.to_string(),
            resource_type: opts.resource_type.clone(),
            resource_id: opts.resource_id.clone(),
            rbac_result: user.rbac,
            abac_result: user.abac,
            final_decision: user.allowed,
            metadata: AuditMetadata::DualCheck {
                propagated_user,
                service_allowed: true,
                matched_policies: user.matched.clone(),
            },
            timestamp: now,
        })
        .await?;

        debug!(
            service_id,
            %propagated_user,
            permission,
            allowed = user.allowed,
            "dual authorization decision"
        );
        if user.allowed {
            Ok(AuthorizationResult::allowed(user.reason))
        } else {
            Ok(AuthorizationResult::denied(user.reason))
        }
    }

    async fn append_audit(&self, record: AuditRecord) -> Result<(), AuthzError> {
        self.audit.append(record).await.map_err(|e| {
            error!(error = %e, "authorization audit append failed");
            AuthzError::Audit(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abac::AbacPolicy;
    use crate::model::{
        GroupMembership, GroupRoleAssignment, MembershipType, ServicePrincipal,
    };
    use async_trait::async_trait;
    use sentra_core::ServicePrincipalId;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Minimal fixture wiring one user → one group → one role → one
    /// permission, with stores that flag unexpected access.
    #[derive(Default)]
    struct FixtureRoleStore {
        roles: Vec<Role>,
        permissions: Vec<Permission>,
        role_permissions: Vec<(RoleId, PermissionId)>,
    }

    #[async_trait]
    impl RoleStore for FixtureRoleStore {
        async fn find_permission_by_name(
            &self,
            name: &str,
        ) -> Result<Option<Permission>, StoreError> {
            Ok(self.permissions.iter().find(|p| p.name == name).cloned())
        }

        async fn exists_permission_for_roles(
            &self,
            name: &str,
            role_ids: &[RoleId],
        ) -> Result<bool, StoreError> {
            let Some(permission) = self.permissions.iter().find(|p| p.name == name) else {
                return Ok(false);
            };
            Ok(self
                .role_permissions
                .iter()
                .any(|(r, p)| *p == permission.id && role_ids.contains(r)))
        }

        async fn find_roles_by_ids(&self, ids: &[RoleId]) -> Result<Vec<Role>, StoreError> {
            Ok(self
                .roles
                .iter()
                .filter(|r| ids.contains(&r.id))
                .cloned()
                .collect())
        }

        async fn find_permission_ids_by_role_ids(
            &self,
            ids: &[RoleId],
        ) -> Result<Vec<(RoleId, PermissionId)>, StoreError> {
            Ok(self
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
            Ok(self
                .permissions
                .iter()
                .filter(|p| ids.contains(&p.id))
                .cloned()
                .collect())
        }

        async fn find_valid_direct_assignments(
            &self,
            _user_id: UserId,
            _now: DateTime<Utc>,
        ) -> Result<Vec<RoleAssignment>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FixtureGroupStore {
        memberships: Vec<GroupMembership>,
        assignments: Vec<GroupRoleAssignment>,
    }

    #[async_trait]
    impl GroupStore for FixtureGroupStore {
        async fn find_active_memberships(
            &self,
            user_id: UserId,
            now: DateTime<Utc>,
        ) -> Result<Vec<GroupMembership>, StoreError> {
            Ok(self
                .memberships
                .iter()
                .filter(|m| m.user_id == user_id && m.is_active(now))
                .cloned()
                .collect())
        }

        async fn find_active_memberships_batch(
            &self,
            user_ids: &[UserId],
            now: DateTime<Utc>,
        ) -> Result<Vec<GroupMembership>, StoreError> {
            Ok(self
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
            Ok(self
                .assignments
                .iter()
                .filter(|a| group_ids.contains(&a.group_id) && a.is_active(now))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct FixturePrincipalStore {
        principals: Vec<ServicePrincipal>,
        grants: Vec<(ServicePrincipalId, PermissionId, Option<String>)>,
    }

    #[async_trait]
    impl PrincipalStore for FixturePrincipalStore {
        async fn find_by_external_id(
            &self,
            external_id: &str,
        ) -> Result<Option<ServicePrincipal>, StoreError> {
            Ok(self
                .principals
                .iter()
                .find(|p| p.external_id == external_id)
                .cloned())
        }

        async fn grant_exists(
            &self,
            principal_id: ServicePrincipalId,
            permission_id: PermissionId,
            resource_pattern: Option<&str>,
        ) -> Result<bool, StoreError> {
            Ok(self.grants.iter().any(|(pr, pe, pattern)| {
                *pr == principal_id
                    && *pe == permission_id
                    && crate::model::grant_pattern_matches(pattern.as_deref(), resource_pattern)
            }))
        }
    }

    /// Policy store that records whether it was ever consulted.
    #[derive(Default)]
    struct WatchedPolicyStore {
        policies: Vec<AbacPolicy>,
        queries: AtomicUsize,
    }

    #[async_trait]
    impl PolicyStore for WatchedPolicyStore {
        async fn find_active_policies(&self) -> Result<Vec<AbacPolicy>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.policies.clone())
        }
    }

    #[derive(Default)]
    struct RecordingAuditSink {
        records: Mutex<Vec<AuditRecord>>,
    }

    #[async_trait]
    impl AuditSink for RecordingAuditSink {
        async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    struct Fixture {
        engine: AuthorizationEngine,
        policy_store: Arc<WatchedPolicyStore>,
        audit: Arc<RecordingAuditSink>,
        user: UserId,
    }

    /// User in one group granting one role that holds `docs:read`.
    fn fixture() -> Fixture {
        let user = UserId::new();
        let group = GroupId::new();
        let role = Role {
            id: RoleId::new(),
            name: "reader".to_string(),
        };
        let permission = Permission {
            id: PermissionId::new(),
            name: "docs:read".to_string(),
        };

        let roles = Arc::new(FixtureRoleStore {
            role_permissions: vec![(role.id, permission.id)],
            roles: vec![role.clone()],
            permissions: vec![permission],
        });
        let groups = Arc::new(FixtureGroupStore {
            memberships: vec![GroupMembership {
                user_id: user,
                group_id: group,
                membership_type: MembershipType::Member,
                valid_until: None,
            }],
            assignments: vec![GroupRoleAssignment {
                group_id: group,
                role_id: role.id,
                valid_until: None,
            }],
        });
        let principals = Arc::new(FixturePrincipalStore::default());
        let policy_store = Arc::new(WatchedPolicyStore::default());
        let audit = Arc::new(RecordingAuditSink::default());

        let engine = AuthorizationEngine::new(
            roles,
            groups,
            principals,
            Arc::clone(&policy_store) as Arc<dyn PolicyStore>,
            Arc::clone(&audit) as Arc<dyn AuditSink>,
        );

        Fixture {
            engine,
            policy_store,
            audit,
            user,
        }
    }

    #[tokio::test]
    async fn granted_permission_allows_with_no_policy_reason() {
        let fx = fixture();
        let result = fx
            .engine
            .check_user_permission(fx.user, "docs:read", &CheckOptions::default())
            .await
            .unwrap();

        assert!(result.allowed);
        assert_eq!(
            result.reason,
            "Access granted: RBAC allowed, no policies matched"
        );
    }

    #[tokio::test]
    async fn unknown_user_denies_with_no_roles_reason() {
        let fx = fixture();
        let result = fx
            .engine
            .check_user_permission(UserId::new(), "docs:read", &CheckOptions::default())
            .await
            .unwrap();

        assert!(!result.allowed);
        assert_eq!(
            result.reason,
            "User does not have permission 'docs:read' (no roles assigned)"
        );
    }

    #[tokio::test]
    async fn rbac_deny_never_consults_the_policy_store() {
        let fx = fixture();
        // Roles exist but do not grant this permission.
        let result = fx
            .engine
            .check_user_permission(fx.user, "docs:delete", &CheckOptions::default())
            .await
            .unwrap();

        assert!(!result.allowed);
        assert_eq!(result.reason, "User does not have permission 'docs:delete'");
        assert_eq!(fx.policy_store.queries.load(Ordering::SeqCst), 0);

        let records = fx.audit.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rbac_result, RbacOutcome::Denied);
        assert_eq!(records[0].abac_result, AbacOutcome::NotEvaluated);
    }

    #[tokio::test]
    async fn each_top_level_check_audits_exactly_once() {
        let fx = fixture();
        fx.engine
            .check_user_permission(fx.user, "docs:read", &CheckOptions::default())
            .await
            .unwrap();
        fx.engine
            .check_user_permission(fx.user, "docs:delete", &CheckOptions::default())
            .await
            .unwrap();

        let records = fx.audit.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].final_decision);
        assert!(!records[1].final_decision);
    }

    #[tokio::test]
    async fn require_permission_raises_denied_with_the_reason() {
        let fx = fixture();
        let err = fx
            .engine
            .require_permission(
                &Principal::user(UserId::new()),
                "docs:read",
                &CheckOptions::default(),
            )
            .await
            .unwrap_err();

        match err {
            AuthzError::Denied(reason) => {
                assert_eq!(
                    reason,
                    "User does not have permission 'docs:read' (no roles assigned)"
                );
            }
            other => panic!("expected Denied, got {other:?}"),
        }

        fx.engine
            .require_permission(
                &Principal::user(fx.user),
                "docs:read",
                &CheckOptions::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_service_principal_denies_without_error() {
        let fx = fixture();
        let result = fx
            .engine
            .check_service_permission("ghost-service", "docs:read", None)
            .await
            .unwrap();

        assert!(!result.allowed);
        assert_eq!(result.reason, "Service principal 'ghost-service' not found");
    }

    #[tokio::test]
    async fn audit_failure_surfaces_as_a_distinct_error() {
        struct FailingAuditSink;

        #[async_trait]
        impl AuditSink for FailingAuditSink {
            async fn append(&self, _record: AuditRecord) -> Result<(), StoreError> {
                Err(StoreError::Backend("disk full".to_string()))
            }
        }

        let fx = fixture();
        let engine = AuthorizationEngine::new(
            Arc::new(FixtureRoleStore::default()),
            Arc::new(FixtureGroupStore::default()),
            Arc::new(FixturePrincipalStore::default()),
            fx.policy_store,
            Arc::new(FailingAuditSink),
        );

        let err = engine
            .check_user_permission(UserId::new(), "docs:read", &CheckOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Audit(_)));
    }
}
