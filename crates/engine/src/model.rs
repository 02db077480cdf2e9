//! Entity records the engine reads at decision time.
//!
//! All of these are created and mutated by role/group/permission management
//! flows outside this crate. The engine only reads them, using "now" as the
//! validity reference instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sentra_core::{GroupId, PermissionId, RoleId, ServicePrincipalId, UserId};

/// A named role. Permissions attach to roles through a many-to-many
/// relation owned by the role store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

/// A named permission. Convention: `domain:resource:action`
/// (e.g. `security:user:view`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
}

/// How a user belongs to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MembershipType {
    #[default]
    Member,
    Owner,
}

/// A user's membership in a group, optionally time-bounded.
///
/// Group entities carry only an upper validity bound; direct
/// [`RoleAssignment`]s additionally support `valid_from`. The asymmetry is
/// intentional and preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub membership_type: MembershipType,
    pub valid_until: Option<DateTime<Utc>>,
}

impl GroupMembership {
    /// Active at `now` iff no expiry is set or the expiry has not passed.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map_or(true, |until| until >= now)
    }
}

/// A role granted to every active member of a group, optionally
/// time-bounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRoleAssignment {
    pub group_id: GroupId,
    pub role_id: RoleId,
    pub valid_until: Option<DateTime<Utc>>,
}

impl GroupRoleAssignment {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map_or(true, |until| until >= now)
    }
}

/// Scope a direct role assignment applies within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    #[default]
    Global,
    Organization,
    Project,
}

/// A role assigned directly to a user (not through a group).
///
/// Direct assignments support a lower validity bound (`valid_from`) so
/// grants can be future-dated; they are resolved through their own lookup
/// path and do not participate in group aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub scope_type: ScopeType,
    pub scope_id: Option<Uuid>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| from <= now)
            && self.valid_until.map_or(true, |until| until >= now)
    }
}

/// A registered machine principal (service account).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePrincipal {
    pub id: ServicePrincipalId,
    pub external_id: String,
    pub enabled: bool,
}

/// Match a stored grant's resource pattern against a requested pattern.
///
/// A grant with no pattern applies to any resource. A stored pattern ending
/// in `*` matches by prefix; anything else matches exactly.
pub fn grant_pattern_matches(grant: Option<&str>, requested: Option<&str>) -> bool {
    match grant {
        None => true,
        Some(pattern) => match pattern.strip_suffix('*') {
            Some(prefix) => requested.is_some_and(|r| r.starts_with(prefix)),
            None => requested == Some(pattern),
        },
    }
}
