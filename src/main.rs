use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunegraph_api::{
    config::{Config, StorageBackend},
    db::{create_pool, create_redis_client, Cache, CacheWriterHandle},
    graph::{GraphStore, MemoryGraphStore, PgGraphStore},
    routes::{create_router, AppState},
    services::{
        CatalogStore, GraphUpdateQueue, IngestionService, MemoryCatalogStore,
        MemoryPlayHistoryStore, PgCatalogStore, PgPlayHistoryStore,
        PlayHistoryStore, QueryLimits, RecommendationService, Reconciler,
    },
};

type Stores = (
    Arc<dyn CatalogStore>,
    Arc<dyn PlayHistoryStore>,
    Arc<dyn GraphStore>,
);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunegraph_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let (catalog, history, graph) = open_stores(&config).await?;
    let (cache, cache_writer) = open_cache(&config).await;

    let (queue, receiver) = GraphUpdateQueue::bounded(config.ingestion_queue_capacity);
    let workers = queue.spawn_workers(receiver, graph.clone(), config.ingestion_workers);

    let state = Arc::new(AppState {
        catalog: catalog.clone(),
        graph: graph.clone(),
        ingestion: IngestionService::new(catalog.clone(), history.clone(), queue),
        recommendations: RecommendationService::new(
            graph.clone(),
            catalog.clone(),
            cache,
            QueryLimits::from(&config),
        ),
        reconciler: Reconciler::new(graph, history, catalog),
    });

    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, backend = ?config.storage_backend, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    workers.shutdown().await;
    if let Some(writer) = cache_writer {
        writer.shutdown().await;
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn open_stores(config: &Config) -> anyhow::Result<Stores> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database_url, config.db_max_connections).await?;
            let catalog: Arc<dyn CatalogStore> = Arc::new(PgCatalogStore::new(pool.clone()));
            let history: Arc<dyn PlayHistoryStore> =
                Arc::new(PgPlayHistoryStore::new(pool.clone()));
            let graph: Arc<dyn GraphStore> = Arc::new(PgGraphStore::new(pool));
            Ok((catalog, history, graph))
        }
        StorageBackend::Memory => {
            let catalog: Arc<dyn CatalogStore> = match &config.catalog_seed_path {
                Some(path) => Arc::new(MemoryCatalogStore::from_json_file(path).await?),
                None => {
                    tracing::warn!("No CATALOG_SEED_PATH set, starting with an empty catalog");
                    Arc::new(MemoryCatalogStore::new())
                }
            };
            let history: Arc<dyn PlayHistoryStore> =
                Arc::new(MemoryPlayHistoryStore::new(catalog.clone()));
            let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
            Ok((catalog, history, graph))
        }
    }
}

/// Connects the result cache when `REDIS_URL` is set. Failures disable caching.
async fn open_cache(config: &Config) -> (Option<Cache>, Option<CacheWriterHandle>) {
    let Some(url) = &config.redis_url else {
        tracing::info!("REDIS_URL not set, result caching disabled");
        return (None, None);
    };

    match create_redis_client(url) {
        Ok(client) => {
            let (cache, writer) = Cache::new(client).await;
            (Some(cache), Some(writer))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Invalid REDIS_URL, result caching disabled");
            (None, None)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
