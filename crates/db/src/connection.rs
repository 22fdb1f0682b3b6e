use std::str::FromStr;
use std::time::Duration;

use requestflow_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Opens the pool the service runs on, creating the database file if needed.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    pool_options(database_url, max_connections, timeout_secs)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect_with(connect_options)
        .await
}

/// Opens an existing database for inspection. Fails instead of creating a
/// missing file and leaves the journal mode alone.
pub async fn connect_existing(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(false);

    pool_options(&config.url, config.max_connections, config.timeout_secs)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect_with(connect_options)
        .await
}

fn pool_options(database_url: &str, max_connections: u32, timeout_secs: u64) -> SqlitePoolOptions {
    // Every in-memory connection is a separate database, so keep exactly one alive.
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections.max(1))
    };
    options.acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
}

/// Cheap liveness check used by the health route and `doctor`.
pub async fn ping(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}
