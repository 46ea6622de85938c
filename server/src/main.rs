use std::sync::Arc;

use anyhow::Context as _;
use catalog_client::{CatalogGateway, RestCatalogGateway};
use common::config::Config;
use engine_client::{EngineClient, EngineSettings};
use metadata_db::{settings, MetadataDb};
use refresh::{PeriodicRefresh, RefreshService};
use task_engine::{EngineExecutor, TaskPlanner, TaskQueue, TaskWorker, WorkerGate};
use tokio::sync::broadcast;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    let config_path =
        std::env::var("LAKEHOUSE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path, true)
        .map_err(|e| anyhow::anyhow!("failed to load config {config_path}: {e}"))?;

    let db = MetadataDb::connect(&config.database.url)
        .await
        .context("could not connect to metadata db")?;

    let catalog: Arc<dyn CatalogGateway> = Arc::new(RestCatalogGateway::new(
        &config.catalog.uri,
        config.catalog.warehouse.as_deref(),
        &config.catalog.default_database,
    ));
    let engine = EngineClient::new(&EngineSettings {
        url: config.engine.url.clone(),
        user: config.engine.user.clone(),
        catalog: config.engine.catalog.clone(),
        schema: config.engine.schema.clone(),
    })
    .context("could not create engine client")?;

    let refresh_service = Arc::new(RefreshService::new(db.clone(), catalog));

    // The worker cap comes from the settings table, falling back to
    // configuration.
    let default_worker_count = config.tasks.worker_count.max(1);
    let worker_count = match settings::get_int(db.pool(), settings::TASK_CONCURRENCY).await {
        Ok(Some(value)) => value.max(1),
        Ok(None) => default_worker_count,
        Err(e) => {
            warn!("could not load task concurrency from settings, using default: {e}");
            default_worker_count
        }
    };

    let gate = WorkerGate::new(worker_count as usize);
    let worker = Arc::new(TaskWorker::new(
        Arc::new(TaskQueue::new(db.clone())),
        Arc::new(EngineExecutor::new(engine, db.clone())),
        refresh_service.clone(),
        gate.clone(),
        config.tasks.poll_interval(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);

    let worker_handle = tokio::spawn(Arc::clone(&worker).run(shutdown_tx.subscribe()));

    let periodic = PeriodicRefresh::new(
        refresh_service.clone(),
        config.refresh.interval(),
        config.refresh.min_age(),
    );
    let refresh_handle = tokio::spawn(periodic.run(shutdown_tx.subscribe()));

    let state = admin_api::ServiceState {
        planner: TaskPlanner::new(db.clone()),
        db,
        refresh: refresh_service,
        gate,
        default_worker_count,
    };

    let (addr, serve) = admin_api::serve(config.http.listen, state, shutdown_tx.subscribe())
        .await
        .map_err(|e| anyhow::anyhow!("could not bind http server: {e}"))?;
    info!("listening on {addr}");
    let server_handle = tokio::spawn(serve);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    let _ = shutdown_tx.send(());

    worker_handle.await.context("worker task panicked")?;
    refresh_handle.await.context("refresh task panicked")?;
    server_handle
        .await
        .context("http server task panicked")?
        .map_err(|e| anyhow::anyhow!("http server error: {e}"))?;

    Ok(())
}
