//! `sentra-engine` — hybrid RBAC+ABAC authorization decisions.
//!
//! The engine answers one question: may this principal perform this action
//! on this (optional) resource? Roles are inherited transitively through
//! time-bounded group membership, the RBAC gate short-circuits on deny, and
//! an attribute-policy layer can override an RBAC allow with an explicit
//! deny. Every top-level decision is appended to an audit sink.
//!
//! This crate is intentionally decoupled from HTTP and storage: persistence
//! is consumed through the contracts in [`store`], implemented elsewhere.

pub mod abac;
pub mod aggregator;
pub mod attributes;
pub mod audit;
pub mod model;
pub mod orchestrator;
pub mod principal;
pub mod rbac;
pub mod store;

pub use abac::{
    AbacEvaluator, AbacPolicy, AttributeSection, Comparison, PolicyCondition, PolicyDecision,
    PolicyEffect, PolicyRef, PolicyVerdict,
};
pub use aggregator::{GroupContext, RoleAggregator};
pub use attributes::{AttributeMap, DecisionContext, resource_attributes};
pub use audit::{AbacOutcome, AuditMetadata, AuditPrincipal, AuditRecord, RbacOutcome};
pub use model::{
    GroupMembership, GroupRoleAssignment, MembershipType, Permission, Role, RoleAssignment,
    ScopeType, ServicePrincipal, grant_pattern_matches,
};
pub use orchestrator::{AuthorizationEngine, AuthorizationResult, AuthzError, CheckOptions};
pub use principal::{Principal, PropagatedUser};
pub use rbac::RbacEvaluator;
pub use store::{AuditSink, GroupStore, PolicyStore, PrincipalStore, RoleStore, StoreError};
