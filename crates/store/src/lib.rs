//! `sentra-store` — store implementations for the authorization engine.
//!
//! Two backends for the contracts in `sentra_engine::store`: an in-memory
//! store for tests/dev and a Postgres store (sqlx) for production.

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryAuditSink, InMemoryAuthStore};
pub use postgres::{PostgresAuditSink, PostgresAuthStore};
