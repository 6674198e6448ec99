use crate::config::{DbConfig, DbSqlxConfig};
use crate::errors::DbError;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{MySql, MySqlPool, Pool, Postgres, Sqlite, SqlitePool};
use std::str::FromStr;

pub async fn create_postgres_pool(config: &DbSqlxConfig) -> Result<Pool<Postgres>, sqlx::Error> {
    let options = PgConnectOptions::from_str(&config.database_url)?;
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
}

pub async fn postgres_migrate(pool: &Pool<Postgres>) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./db/migration/postgres").run(pool).await
}

pub async fn create_sqlite_pool(config: &DbSqlxConfig) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
}

pub async fn sqlite_migrate(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./db/migration/sqlite").run(pool).await
}

pub async fn create_mysql_pool(config: &DbSqlxConfig) -> Result<MySqlPool, sqlx::Error> {
    let options = MySqlConnectOptions::from_str(&config.database_url)?;
    MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
}

pub async fn mysql_migrate(pool: &MySqlPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./db/migration/mysql").run(pool).await
}

/// The three pools a running process can end up with, picked by `DbConfig`.
/// `MetadataStore::new` matches on this to build the right `DbRepo<DB>`.
pub enum AnyPool {
    Postgres(Pool<Postgres>),
    Sqlite(Pool<Sqlite>),
    Mysql(Pool<MySql>),
}

pub async fn connect_and_migrate(config: &DbConfig) -> Result<AnyPool, DbError> {
    match config {
        DbConfig::Postgres(cfg) => {
            let pool = create_postgres_pool(cfg).await?;
            postgres_migrate(&pool).await?;
            Ok(AnyPool::Postgres(pool))
        }
        DbConfig::Sqlite(cfg) => {
            let pool = create_sqlite_pool(cfg).await?;
            sqlite_migrate(&pool).await?;
            Ok(AnyPool::Sqlite(pool))
        }
        DbConfig::Mysql(cfg) => {
            let pool = create_mysql_pool(cfg).await?;
            mysql_migrate(&pool).await?;
            Ok(AnyPool::Mysql(pool))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbSqlxConfig;
    use sqlx::Row;

    /// Exercises the real `db/migration/sqlite` directory against a
    /// file-backed database, the same `sqlx::migrate!` path production
    /// takes (the dialect repo tests use an in-memory pool with a
    /// hand-written schema instead, so this is the only place the migration
    /// SQL itself gets run).
    #[tokio::test]
    async fn sqlite_migration_creates_blobs_and_users_tables() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("blob-service.db");
        let config = DbSqlxConfig {
            database_url: format!("sqlite://{}?mode=rwc", db_path.display()),
            max_connections: 1,
        };

        let pool = create_sqlite_pool(&config).await.unwrap();
        sqlite_migrate(&pool).await.unwrap();

        let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'blobs'")
            .fetch_optional(&pool)
            .await
            .unwrap();
        assert!(row.is_some(), "migration should create the blobs table");

        let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'users'")
            .fetch_optional(&pool)
            .await
            .unwrap();
        assert!(row.is_some(), "migration should create the users table");

        let _: String = sqlx::query("SELECT sql FROM sqlite_master WHERE name = 'blobs'")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get(0);
    }
}
