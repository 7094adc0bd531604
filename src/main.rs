mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod queue;
mod scanner;
mod scheduler;
mod services;
mod storage;

#[cfg(test)]
mod test_support;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::queue::JobQueue;
use crate::scanner::VirusScanner;
use crate::storage::ObjectStore;

/// Application state shared across handlers and workers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub store: Arc<dyn ObjectStore>,
    pub scanner: Arc<dyn VirusScanner>,
    pub queue: JobQueue,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nimbus=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Nimbus...");

    let config = Config::load()?;
    let config = Arc::new(config);
    tracing::info!("Configuration loaded");

    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let store: Arc<dyn ObjectStore> = Arc::new(storage::S3Store::new(&config.s3)?);
    let scanner: Arc<dyn VirusScanner> = Arc::new(scanner::ClamdScanner::new(&config.clamav));
    if !scanner.ping().await {
        tracing::warn!("clamd is not reachable; scans will retry until it is");
    }

    let state = AppState {
        db: db.clone(),
        config: config.clone(),
        store,
        scanner,
        queue: JobQueue::new(db),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = queue::spawn_workers(state.clone(), config.scan.concurrency, shutdown_rx.clone());
    let scheduler = scheduler::spawn(state.clone(), shutdown_rx);
    tracing::info!(workers = workers.len(), "queue workers and scheduler running");

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background tasks after the listener drains.
    let _ = shutdown_tx.send(true);
    for handle in workers.into_iter().chain(std::iter::once(scheduler)) {
        let _ = handle.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/public/share/:id", get(handlers::share::get_public_share))
        .route("/public/share/:id/verify", post(handlers::share::verify_share))
        .route(
            "/public/share/:id/download",
            get(handlers::share::download_public_share),
        );

    // Protected routes (bearer token required)
    let protected_routes = Router::new()
        // Account
        .route("/account", get(handlers::account::get_account))
        .route("/account/quota", get(handlers::account::get_quota))
        .route("/account/audit", get(handlers::account::get_audit_log))
        // Uploads
        .route("/uploads", post(handlers::upload::initiate))
        .route("/uploads/complete", post(handlers::upload::complete))
        .route("/uploads/abort", post(handlers::upload::abort))
        // Files
        .route("/files", get(handlers::file::list_files))
        .route(
            "/files/:id",
            get(handlers::file::get_file)
                .patch(handlers::file::update_file)
                .delete(handlers::file::delete_file),
        )
        .route("/files/:id/download", get(handlers::file::download_file))
        // Folders
        .route(
            "/folders",
            get(handlers::folder::list_children).post(handlers::folder::create_folder),
        )
        .route(
            "/folders/:id",
            patch(handlers::folder::update_folder).delete(handlers::folder::delete_folder),
        )
        .route("/folders/:id/breadcrumbs", get(handlers::folder::breadcrumbs))
        // Trash
        .route(
            "/trash",
            get(handlers::trash::list_trash).delete(handlers::trash::empty_trash),
        )
        .route("/trash/files/:id/restore", post(handlers::trash::restore_file))
        .route("/trash/folders/:id/restore", post(handlers::trash::restore_folder))
        // Shares
        .route(
            "/shares",
            get(handlers::share::list_shares).post(handlers::share::create_share),
        )
        .route("/shares/:id", delete(handlers::share::delete_share))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Operator routes (shared secret, not user tokens)
    let internal_routes = Router::new()
        .route("/internal/health", get(handlers::internal::health))
        .route("/internal/reconcile", post(handlers::internal::reconcile_quota))
        .route("/internal/purge-trash", post(handlers::internal::purge_trash))
        .route("/internal/purge-shares", post(handlers::internal::purge_shares))
        .route("/internal/reap-uploads", post(handlers::internal::reap_uploads))
        .route("/internal/scan-sweep", post(handlers::internal::scan_sweep))
        .route("/internal/download-url", get(handlers::internal::download_url))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::internal_guard,
        ));

    Router::new()
        .nest("/api/v1", public_routes.merge(protected_routes))
        .merge(internal_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
