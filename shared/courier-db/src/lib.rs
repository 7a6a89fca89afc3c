//! Postgres-backed storage for the courier backend
//!
//! Wraps `tokio-postgres`/`deadpool-postgres` with a pooled client and
//! the `ToSql`/`FromSql` glue the identifier codec types in
//! `courier-core` need to round-trip through the database.

mod error;
mod pool;
mod types;

pub use error::{DbError, Result};
pub use pool::{PgPool, PoolConfig, PoolStats};
pub use types::get_required;

/// Re-export tokio-postgres types callers need without taking the
/// dependency directly.
pub use tokio_postgres::{types::ToSql, Row, Statement};
