use serde::{Deserialize, Serialize};

use sentra_core::UserId;

/// The authenticated entity requesting an action.
///
/// Principals are produced by an external identity/token layer; this crate
/// never validates signatures or expiry and never mints principals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    /// A human user.
    User { user_id: UserId },

    /// A machine principal, optionally carrying a propagated end-user
    /// identity for delegated calls. With a propagated user present, both
    /// the service grant and the user's own permission must hold.
    Service {
        service_id: String,
        propagated: Option<PropagatedUser>,
    },
}

impl Principal {
    pub fn user(user_id: UserId) -> Self {
        Self::User { user_id }
    }

    pub fn service(service_id: impl Into<String>) -> Self {
        Self::Service {
            service_id: service_id.into(),
            propagated: None,
        }
    }

    pub fn service_for_user(service_id: impl Into<String>, propagated: PropagatedUser) -> Self {
        Self::Service {
            service_id: service_id.into(),
            propagated: Some(propagated),
        }
    }
}

/// End-user identity embedded in a service token at issue time.
///
/// The permission snapshot is carried as issued, but decisions re-evaluate
/// the user through the live role/group path: a stale snapshot must not
/// outlive a revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagatedUser {
    pub user_id: UserId,
    pub permissions: Vec<String>,
}

impl PropagatedUser {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            permissions: Vec::new(),
        }
    }
}
