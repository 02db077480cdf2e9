//! Attribute-based policy records and evaluation.
//!
//! Policies are pure data: a named effect plus a conjunctive condition list
//! over the subject/resource/context attribute maps. Evaluation is
//! deterministic (name order), collects *every* matching policy for audit
//! completeness, and combines matches with explicit-deny-wins.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sentra_core::PolicyId;

use crate::attributes::AttributeMap;
use crate::store::{PolicyStore, StoreError};

/// Effect a matching policy contributes to the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

/// Which attribute map a condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeSection {
    Subject,
    Resource,
    Context,
}

/// A single comparison inside a policy predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Comparison {
    /// Attribute equals the operand.
    Equals { value: Value },
    /// Attribute is present and differs from the operand.
    NotEquals { value: Value },
    /// Attribute (a scalar) is one of the operands.
    In { values: Vec<Value> },
    /// Attribute (an array) contains the operand. Useful against the
    /// `roles` subject attribute.
    Contains { value: Value },
    /// Attribute is present, whatever its value.
    Exists,
}

/// One conjunct of a policy predicate.
///
/// A condition never holds against a missing attribute, including the case
/// where the whole resource/context map is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCondition {
    pub section: AttributeSection,
    pub key: String,
    #[serde(flatten)]
    pub comparison: Comparison,
}

impl PolicyCondition {
    fn holds(
        &self,
        subject: &AttributeMap,
        resource: Option<&AttributeMap>,
        context: Option<&AttributeMap>,
    ) -> bool {
        let map = match self.section {
            AttributeSection::Subject => Some(subject),
            AttributeSection::Resource => resource,
            AttributeSection::Context => context,
        };
        let Some(value) = map.and_then(|m| m.get(&self.key)) else {
            return false;
        };
        match &self.comparison {
            Comparison::Equals { value: expected } => value == expected,
            Comparison::NotEquals { value: expected } => value != expected,
            Comparison::In { values } => values.contains(value),
            Comparison::Contains { value: needle } => value
                .as_array()
                .is_some_and(|items| items.contains(needle)),
            Comparison::Exists => true,
        }
    }
}

/// An attribute-based policy row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbacPolicy {
    pub id: PolicyId,
    pub name: String,
    pub effect: PolicyEffect,
    pub active: bool,
    pub conditions: Vec<PolicyCondition>,
}

impl AbacPolicy {
    /// All conditions must hold. A policy with no conditions matches every
    /// request (global allow/deny rules).
    pub fn matches(
        &self,
        subject: &AttributeMap,
        resource: Option<&AttributeMap>,
        context: Option<&AttributeMap>,
    ) -> bool {
        self.conditions
            .iter()
            .all(|c| c.holds(subject, resource, context))
    }
}

/// Reference to a matched policy, kept in audit records even when the
/// policy's effect did not win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRef {
    pub id: PolicyId,
    pub name: String,
    pub effect: PolicyEffect,
}

/// Net effect of the matched policy set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny,
}

/// Outcome of evaluating the active policy set. `decision: None` means no
/// policy matched and the caller's default applies.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyVerdict {
    pub decision: Option<PolicyDecision>,
    pub reason: String,
    pub matched: Vec<PolicyRef>,
}

/// Evaluates the active policy set against attribute maps.
pub struct AbacEvaluator {
    policies: Arc<dyn PolicyStore>,
}

impl AbacEvaluator {
    pub fn new(policies: Arc<dyn PolicyStore>) -> Self {
        Self { policies }
    }

    /// Evaluate every active policy in name order, collecting all matches.
    /// An explicit deny among the matches wins over any allow.
    pub async fn evaluate(
        &self,
        subject: &AttributeMap,
        resource: Option<&AttributeMap>,
        context: Option<&AttributeMap>,
    ) -> Result<PolicyVerdict, StoreError> {
        let mut policies = self.policies.find_active_policies().await?;
        // The store contract already promises active-only in name order;
        // re-applying both here keeps the verdict deterministic even against
        // a loose implementation.
        policies.retain(|p| p.active);
        policies.sort_by(|a, b| a.name.cmp(&b.name));

        let matched: Vec<PolicyRef> = policies
            .iter()
            .filter(|p| p.matches(subject, resource, context))
            .map(|p| PolicyRef {
                id: p.id,
                name: p.name.clone(),
                effect: p.effect,
            })
            .collect();

        let deny = matched.iter().find(|m| m.effect == PolicyEffect::Deny);
        let allow = matched.iter().find(|m| m.effect == PolicyEffect::Allow);

        let (decision, reason) = match (deny, allow) {
            (Some(deny), _) => (
                Some(PolicyDecision::Deny),
                format!("policy '{}' denies access", deny.name),
            ),
            (None, Some(allow)) => (
                Some(PolicyDecision::Allow),
                format!("policy '{}' allows access", allow.name),
            ),
            (None, None) => (None, "no policy matched".to_string()),
        };

        Ok(PolicyVerdict {
            decision,
            reason,
            matched,
        })
    }
}
