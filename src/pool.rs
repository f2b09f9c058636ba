use crate::db;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

/// Writers hold at most one connection each, so this also bounds how many
/// request workers can touch the database at once.
const MAX_CONNECTIONS: u32 = 16;

pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Every pooled handle gets the same busy timeout and pragmas as
/// `db::connect`.
pub fn build(path: &Path) -> anyhow::Result<ConnectionPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| db::configure(conn));
    let pool = r2d2::Pool::builder()
        .max_size(MAX_CONNECTIONS)
        .min_idle(Some(1))
        .build(manager)?;
    Ok(pool)
}
