//! `arvo-persistence`: a Postgres-backed `MemoryStore` implementation,
//! swappable in wherever `arvo-core::memory::InMemoryMemoryStore` is used.
//!
//! Modules:
//! - `pg`: the Diesel-backed `MemoryStore` over `orchestration_records` /
//!   `orchestration_locks`, plus an append-only `orchestration_event_log`.
//! - `migrations`: the embedded migration runner.
//! - `config`: environment-driven connection configuration.
//! - `schema`: hand-declared Diesel table bindings.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::init_dotenv;
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgMemoryStore, PgPool, PoolProvider};
