//! Database layer: pool, repositories, and the relational presence store for PostgreSQL.

mod pool;
mod repositories;
mod store;

pub use pool::{create_pool, DbPool};
pub use repositories::*;
pub use store::{PgPresenceStore, PgTitleSource};
