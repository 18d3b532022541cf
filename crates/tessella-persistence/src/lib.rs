//! tessella-persistence
//!
//! Postgres-backed `tessella_core::Store` implementation, connection
//! pooling, embedded migrations, and env-based configuration — the durable
//! backend behind the in-memory reference store used by `tessella-core`'s
//! own tests.
//!
//! Modules:
//! - `pg`: `PgStore` (the `Store` impl) plus pool construction.
//! - `migrations`: embedded Diesel migration runner.
//! - `config`: `.env`-backed connection configuration.
//! - `schema`: hand-written Diesel table declarations.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgPool, PgStore, PoolProvider};
