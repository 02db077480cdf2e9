//! Group-inherited role aggregation.
//!
//! Collapses active group memberships and group-role assignments into one
//! deduplicated role-id set per user. The batch variant exists for callers
//! resolving a whole page of users at once (field-resolver fan-out): it
//! issues **one** membership query and **one** assignment query regardless
//! of how many users are passed in.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use sentra_core::{GroupId, RoleId, UserId};

use crate::store::{GroupStore, StoreError};

/// A user's resolved group context: which groups contributed, and the
/// deduplicated role ids they grant.
#[derive(Debug, Clone, Default)]
pub struct GroupContext {
    pub group_ids: Vec<GroupId>,
    pub role_ids: BTreeSet<RoleId>,
}

pub struct RoleAggregator {
    groups: Arc<dyn GroupStore>,
}

impl RoleAggregator {
    pub fn new(groups: Arc<dyn GroupStore>) -> Self {
        Self { groups }
    }

    /// Resolve one user's groups and group-inherited role ids at `now`.
    ///
    /// A user with no active memberships resolves to an empty context, not
    /// an error.
    pub async fn group_context(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<GroupContext, StoreError> {
        let memberships = self.groups.find_active_memberships(user_id, now).await?;
        let mut group_ids: Vec<GroupId> = memberships.iter().map(|m| m.group_id).collect();
        group_ids.sort();
        group_ids.dedup();

        if group_ids.is_empty() {
            return Ok(GroupContext::default());
        }

        let assignments = self
            .groups
            .find_active_role_assignments(&group_ids, now)
            .await?;
        let role_ids = assignments.iter().map(|a| a.role_id).collect();

        Ok(GroupContext {
            group_ids,
            role_ids,
        })
    }

    pub async fn effective_role_ids(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<RoleId>, StoreError> {
        Ok(self.group_context(user_id, now).await?.role_ids)
    }

    /// Batch variant: one membership query and one assignment query total.
    ///
    /// Every requested user id appears in the result, mapped to an empty set
    /// when nothing resolves.
    pub async fn effective_role_ids_batch(
        &self,
        user_ids: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<HashMap<UserId, BTreeSet<RoleId>>, StoreError> {
        let mut resolved: HashMap<UserId, BTreeSet<RoleId>> =
            user_ids.iter().map(|u| (*u, BTreeSet::new())).collect();
        if user_ids.is_empty() {
            return Ok(resolved);
        }

        let memberships = self
            .groups
            .find_active_memberships_batch(user_ids, now)
            .await?;
        let mut group_ids: Vec<GroupId> = memberships.iter().map(|m| m.group_id).collect();
        group_ids.sort();
        group_ids.dedup();
        if group_ids.is_empty() {
            return Ok(resolved);
        }

        let assignments = self
            .groups
            .find_active_role_assignments(&group_ids, now)
            .await?;
        let mut roles_by_group: HashMap<GroupId, Vec<RoleId>> = HashMap::new();
        for assignment in &assignments {
            roles_by_group
                .entry(assignment.group_id)
                .or_default()
                .push(assignment.role_id);
        }

        for membership in &memberships {
            let Some(role_ids) = roles_by_group.get(&membership.group_id) else {
                continue;
            };
            if let Some(set) = resolved.get_mut(&membership.user_id) {
                set.extend(role_ids.iter().copied());
            }
        }

        Ok(resolved)
    }
}
