//! `sentra-core` — identifier and error primitives shared across the
//! authorization engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{GroupId, PermissionId, PolicyId, RoleId, ServicePrincipalId, UserId};
