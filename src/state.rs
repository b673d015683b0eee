use diesel::{
    SqliteConnection,
    r2d2::{ConnectionManager, Pool, PoolError},
};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Builds the connection pool. A `:memory:` url gets a single connection,
/// because each new connection to `:memory:` opens a fresh empty database.
pub fn build_pool(db_url: &str) -> Result<DbPool, PoolError> {
    Pool::builder()
        .max_size(if db_url == ":memory:" { 1 } else { 10 })
        .build(ConnectionManager::<SqliteConnection>::new(db_url))
}
