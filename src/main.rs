use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use appointd::auth::AuthConfig;
use appointd::catalog::{Catalog, InMemoryCatalog};
use appointd::clock::SystemClock;
use appointd::config::Config;
use appointd::http::{self, AppState};
use appointd::http::ratelimit::{FixedWindowLimiter, InMemoryCounterStore};
use appointd::tenant::TenantManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    appointd::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let catalog: Arc<dyn Catalog> = match &config.catalog {
        Some(path) => {
            let catalog = InMemoryCatalog::load(path)?;
            info!("  catalog: {} ({} businesses)", path.display(), catalog.business_count());
            Arc::new(catalog)
        }
        None => {
            tracing::warn!("APPOINTD_CATALOG not set, starting with an empty catalog");
            Arc::new(InMemoryCatalog::new())
        }
    };

    let tenants = Arc::new(TenantManager::new(
        config.data_dir.clone(),
        config.compact_threshold,
        catalog,
    ));
    let limiter = Arc::new(FixedWindowLimiter::new(
        Arc::new(InMemoryCounterStore::new()),
        config.rate_limit,
        config.rate_window,
    ));
    let auth = AuthConfig {
        business_token: config.business_token.clone(),
    };
    if auth.business_token.is_none() {
        tracing::warn!("APPOINTD_BUSINESS_TOKEN not set: unidentified callers act as the business");
    }
    let state = AppState::new(tenants, auth, Arc::new(SystemClock), limiter);
    let app = http::router(state, config.max_connections);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("appointd listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {}", config.max_connections);
    info!("  rate limit: {} per {:?}", config.rate_limit, config.rate_window);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    http::serve(listener, app, shutdown_signal()).await?;

    info!("appointd stopped");
    Ok(())
}

/// Resolves on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
    info!("shutdown signal received, draining requests");
}
