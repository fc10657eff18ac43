use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shopfloor::api::{build_router, AppState};
use shopfloor::clock::SystemClock;
use shopfloor::config::Config;
use shopfloor::engine::Engine;
use shopfloor::reconciler;

const COMPACT_CHECK_PERIOD: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    shopfloor::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(
        Engine::new(config.wal_path(), Arc::new(SystemClock))?
            .with_project_delete_policy(config.project_delete_policy),
    );

    tokio::spawn(reconciler::run_reconciler(engine.clone(), config.reconcile_interval));
    tokio::spawn(reconciler::run_compactor(
        engine.clone(),
        config.compact_threshold,
        COMPACT_CHECK_PERIOD,
    ));

    let app = build_router(Arc::new(AppState { engine }), config.request_timeout);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("shopfloor listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  reconcile every {}s", config.reconcile_interval.as_secs());
    info!("  project delete policy: {:?}", config.project_delete_policy);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shopfloor stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
