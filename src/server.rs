use cloud_blob_service::api::{combined_routes, AppState};
use cloud_blob_service::auth::{InMemoryUsersStore, User};
use cloud_blob_service::config::{load_config, AppConfig, DbConfig};
use cloud_blob_service::db::{connect_and_migrate, AnyPool};
use cloud_blob_service::job_queue::JobQueue;
use cloud_blob_service::metadata_store::MetadataStore;
use cloud_blob_service::monitor::{CpuMemoryMonitor, ResourceMonitor};
use cloud_blob_service::{MysqlMetadataRepo, PostgresMetadataRepo, SqliteMetadataRepo};
use poem::listener::TcpListener;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

async fn make_metadata_store(config: &DbConfig) -> anyhow::Result<Arc<dyn MetadataStore>> {
    let pool = connect_and_migrate(config).await?;
    let store: Arc<dyn MetadataStore> = match pool {
        AnyPool::Postgres(pool) => Arc::new(PostgresMetadataRepo::new(pool)),
        AnyPool::Sqlite(pool) => Arc::new(SqliteMetadataRepo::new(pool)),
        AnyPool::Mysql(pool) => Arc::new(MysqlMetadataRepo::new(pool)),
    };
    store.init().await?;
    Ok(store)
}

/// No account-provisioning HTTP surface is in scope (spec §1 Non-goals), so
/// the bootstrap seeds a single operator account from config. A real
/// deployment would instead run the admin CLI named in spec §1.
fn seed_users_store() -> Arc<InMemoryUsersStore> {
    let store = Arc::new(InMemoryUsersStore::new());
    store.insert(User {
        id: uuid::Uuid::new_v4(),
        username: "admin".to_string(),
        first_name: "Admin".to_string(),
        last_name: "User".to_string(),
        email: "admin@example.com".to_string(),
        disabled: false,
        hashed_password: std::env::var("BLOB_SERVICE_ADMIN_PASSWORD")
            .unwrap_or_else(|_| "admin".to_string()),
    });
    store
}

async fn async_main(config: AppConfig) -> anyhow::Result<()> {
    let metadata_store = make_metadata_store(&config.db).await?;

    let queue = Arc::new(JobQueue::new(metadata_store, config.queue.clone()));
    queue.start().await;

    let monitor = Arc::new(CpuMemoryMonitor::new(config.monitor.clone()));
    let monitor_handle: Arc<dyn ResourceMonitor> = monitor.clone();
    tokio::spawn(async move {
        monitor.run().await;
    });

    let state = AppState {
        queue: Arc::clone(&queue),
        auth_config: Arc::new(config.auth.clone()),
        users_store: seed_users_store(),
        monitor: monitor_handle,
    };

    let app = combined_routes(&state);

    info!(host = %config.http.host, port = config.http.port, "starting blob service");
    let addr = format!("{}:{}", config.http.host, config.http.port);

    let result = poem::Server::new(TcpListener::bind(addr)).run(app).await;

    queue.close().await;
    result.map_err(anyhow::Error::from)
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = load_config()?;
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))
}
