//! Audit trail records.
//!
//! One record is appended per top-level check entry point. Internal helper
//! evaluations never audit on their own, so the trail carries exactly the
//! outward-facing decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentra_core::{GroupId, RoleId, UserId};

use crate::abac::PolicyRef;

/// RBAC stage outcome. On the service path this records the grant check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RbacOutcome {
    Allowed,
    Denied,
}

/// ABAC stage outcome. `NotEvaluated` records the short-circuit on RBAC
/// deny and the service-only path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbacOutcome {
    NotEvaluated,
    NoPolicyMatched,
    Allowed,
    Denied,
}

/// Who the decision was about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditPrincipal {
    User { user_id: UserId },
    Service { service_id: String },
}

/// Fixed, versioned per-decision-kind metadata.
///
/// A closed enum instead of a free-form map keeps audit rows
/// machine-parseable; extend by adding variants, not keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum AuditMetadata {
    /// User-path decision (v1).
    UserCheck { matched_policies: Vec<PolicyRef> },

    /// Service-grant decision (v1).
    ServiceCheck { resource_pattern: Option<String> },

    /// Dual decision for a service token carrying a propagated user (v1).
    /// `matched_policies` is empty when the service side already failed and
    /// the user path was never evaluated.
    DualCheck {
        propagated_user: UserId,
        service_allowed: bool,
        matched_policies: Vec<PolicyRef>,
    },
}

/// One appended row per top-level check. Enough structure to reconstruct
/// who/what/when/why, including the sub-decisions behind the final one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub principal: AuditPrincipal,
    pub groups: Vec<GroupId>,
    pub role_ids: Vec<RoleId>,
    pub requested_action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub rbac_result: RbacOutcome,
    pub abac_result: AbacOutcome,
    pub final_decision: bool,
    pub metadata: AuditMetadata,
    pub timestamp: DateTime<Utc>,
}
