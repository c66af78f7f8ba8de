use std::sync::Arc;

use mentor_core::config::Config;
use mentor_core::db::Database;
use mentor_core::logging;
use mentor_core::workers::WorkerManager;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    let db = match Database::connect(&config.database_url).await {
        Ok(db) => Arc::new(db),
        Err(err) => {
            tracing::error!(error = %err, url = %config.database_url, "database connection failed");
            std::process::exit(1);
        }
    };
    tracing::info!(url = %config.database_url, "database ready");

    let worker_manager = match WorkerManager::new(Arc::clone(&db), Arc::new(config.core.clone())).await
    {
        Ok(manager) => manager,
        Err(err) => {
            tracing::error!(error = %err, "worker manager initialization failed");
            std::process::exit(1);
        }
    };
    if let Err(err) = worker_manager.start().await {
        tracing::error!(error = %err, "failed to start background sweeps");
        std::process::exit(1);
    }

    shutdown_signal().await;

    worker_manager.stop().await;
    tracing::info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
