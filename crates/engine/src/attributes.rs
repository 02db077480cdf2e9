//! Attribute maps and the per-decision context value object.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use sentra_core::{GroupId, RoleId, UserId};

use crate::model::Role;

/// Attribute map evaluated by ABAC policies.
///
/// A `BTreeMap` keeps iteration order (and the serialized form in audit
/// records) deterministic.
pub type AttributeMap = BTreeMap<String, Value>;

/// Everything the orchestrator resolves about a user before deciding.
///
/// Built once per check and threaded through the RBAC and ABAC steps as an
/// argument, so the same role/group lookups never run twice within one
/// decision.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub user_id: UserId,
    pub group_ids: Vec<GroupId>,
    pub role_ids: Vec<RoleId>,
    pub roles: Vec<Role>,
}

impl DecisionContext {
    /// Subject attributes derived from the resolved role/group context,
    /// merged with caller-supplied additions (caller keys win on conflict).
    pub fn subject_attributes(&self, extra: Option<&AttributeMap>) -> AttributeMap {
        let mut attrs = AttributeMap::new();
        attrs.insert("user_id".to_string(), json!(self.user_id));
        attrs.insert(
            "roles".to_string(),
            json!(self.roles.iter().map(|r| r.name.as_str()).collect::<Vec<_>>()),
        );
        attrs.insert("role_ids".to_string(), json!(self.role_ids));
        attrs.insert("groups".to_string(), json!(self.group_ids));
        if let Some(extra) = extra {
            for (key, value) in extra {
                attrs.insert(key.clone(), value.clone());
            }
        }
        attrs
    }
}

/// Resource attributes from the requested resource, merged with
/// caller-supplied additions. Returns `None` when there is nothing to build
/// from, so policies conditioned on the resource section cannot match.
pub fn resource_attributes(
    resource_type: Option<&str>,
    resource_id: Option<&str>,
    extra: Option<&AttributeMap>,
) -> Option<AttributeMap> {
    let mut attrs = AttributeMap::new();
    if let Some(rtype) = resource_type {
        attrs.insert("type".to_string(), json!(rtype));
    }
    if let Some(rid) = resource_id {
        attrs.insert("id".to_string(), json!(rid));
    }
    if let Some(extra) = extra {
        for (key, value) in extra {
            attrs.insert(key.clone(), value.clone());
        }
    }
    if attrs.is_empty() { None } else { Some(attrs) }
}
