use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which SQL dialect backs `MetadataStore`. Selects both the connection
/// string parsing and the `db/migration/<dialect>` directory passed to
/// `sqlx::migrate!`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DbConfig {
    Postgres(DbSqlxConfig),
    Sqlite(DbSqlxConfig),
    Mysql(DbSqlxConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSqlxConfig {
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig::Sqlite(DbSqlxConfig {
            database_url: "sqlite://blob-service.db?mode=rwc".to_string(),
            max_connections: 10,
        })
    }
}

/// Job-queue admission and pruning knobs (spec §4.5/§6 configuration table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_jobs: usize,
    pub max_pending_jobs: usize,
    pub workers: usize,
    #[serde(with = "humantime_serde")]
    pub blob_max_age: Duration,
    #[serde(with = "humantime_serde")]
    pub prune_interval: Duration,
    pub database_transaction_retries: u32,
    #[serde(with = "humantime_serde")]
    pub database_transaction_retry_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_jobs: 64,
            max_pending_jobs: 256,
            workers: 8,
            blob_max_age: Duration::from_secs(3600),
            prune_interval: Duration::from_secs(30),
            database_transaction_retries: 3,
            database_transaction_retry_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            token_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub db: DbConfig,
    pub queue: QueueConfig,
    pub auth: AuthConfig,
    pub monitor: MonitorConfig,
}

/// Builds the layered config loader: compiled-in defaults, then
/// `config/blob-service.toml` if present, then `BLOB_SERVICE_`-prefixed
/// environment variables, highest precedence last.
pub fn make_config_loader() -> Figment {
    Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file("config/blob-service.toml"))
        .merge(Env::prefixed("BLOB_SERVICE_").split("__"))
}

pub fn load_config() -> Result<AppConfig, figment::Error> {
    make_config_loader().extract()
}
