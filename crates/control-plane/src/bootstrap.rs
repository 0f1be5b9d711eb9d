//! Process wiring: catalog, stores and dispatcher.

use std::sync::Arc;

use runhub_core::builtin_catalog;

use crate::config::{AppConfig, DatabaseConfig, StoreKind};
use crate::db::{create_pool, health_check};
use crate::error::AppResult;
use crate::services::{Dispatcher, DispatcherConfig};
use crate::store::{MemoryEntityStore, MemoryRunStore, PgRunStore, RunStore};

/// Running control plane components.
pub struct Services {
    pub dispatcher: Arc<Dispatcher>,
    pub entities: Arc<MemoryEntityStore>,
}

/// Open the configured run store.
pub async fn open_run_store(config: &AppConfig) -> AppResult<Arc<dyn RunStore>> {
    match config.store {
        StoreKind::Memory => {
            tracing::info!("Using in-memory run store");
            Ok(Arc::new(MemoryRunStore::new()))
        }
        StoreKind::Postgres => {
            let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load database config, using defaults");
                DatabaseConfig::default()
            });

            let pool = create_pool(&db_config).await?;
            if !health_check(&pool).await {
                tracing::warn!("Database health check failed");
            }

            let store = PgRunStore::new(pool, &db_config.schema)?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}

/// Register the built-in plugins and start the dispatcher.
pub async fn bootstrap(config: &AppConfig) -> AppResult<Services> {
    let catalog = builtin_catalog(config.k8s_job(), config.local())?;
    let store = open_run_store(config).await?;
    let entities = Arc::new(MemoryEntityStore::new());

    let dispatcher = Dispatcher::new(
        catalog,
        store,
        entities.clone(),
        DispatcherConfig::from(config),
    )?;

    tracing::info!(
        runtimes = ?dispatcher.runtimes().names(),
        workers = config.worker_count,
        "Dispatcher ready"
    );

    Ok(Services {
        dispatcher: Arc::new(dispatcher),
        entities,
    })
}
