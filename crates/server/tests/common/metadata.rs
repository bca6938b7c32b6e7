//! Metadata store harnesses for the registry and ledger tests.

use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;
use tessera_metadata::{MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore};
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// File-backed SQLite registry, removed with its directory on drop.
#[allow(dead_code)]
pub struct TestMetadata {
    sqlite: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let sqlite = Arc::new(SqliteStore::new(temp_dir.path().join("registry.db"), None).await?);
        Ok(Self {
            sqlite,
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.sqlite.clone()
    }

    /// Raw pool, for asserting on ledger rows directly.
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite.pool()
    }
}

/// Start a throwaway PostgreSQL registry. The container lives as long as
/// the returned handle.
async fn postgres_registry()
-> MetadataResult<(Arc<dyn MetadataStore>, ContainerAsync<Postgres>)> {
    let container = Postgres::default()
        .with_tag("15-alpine")
        .start()
        .await
        .map_err(|e| MetadataError::Config(format!("postgres container did not start: {e}")))?;
    let host = container
        .get_host()
        .await
        .map_err(|e| MetadataError::Config(e.to_string()))?;
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .map_err(|e| MetadataError::Config(e.to_string()))?;

    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
    let store = PostgresStore::from_url(&url, 5, None).await?;
    Ok((Arc::new(store), container))
}

/// Run a registry test against SQLite, then PostgreSQL when Docker is
/// reachable and `SKIP_POSTGRES_TESTS` is unset.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestMetadata::new().await.expect("sqlite registry");
    test_fn.clone()(sqlite.store()).await;

    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return;
    }
    match postgres_registry().await {
        Ok((store, _container)) => test_fn(store).await,
        Err(err) => eprintln!("Skipping PostgreSQL registry tests: {err}"),
    }
}
