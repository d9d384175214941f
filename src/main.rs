use std::sync::Arc;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use matdev_linker::adapters::{BridgeConnector, FileCredentialStore, PngQrRenderer};
use matdev_linker::config::LinkerConfig;
use matdev_linker::lifecycle::SessionManager;
use matdev_linker::server::start_server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("matdev_linker=info,tower_http=info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().any(|arg| arg == "--version" || arg == "-V") {
        println!("matdev-linker {}", VERSION);
        return Ok(());
    }

    color_eyre::install()?;
    init_tracing();

    let config = LinkerConfig::from_env();
    info!(
        sessions_dir = %config.sessions_dir.display(),
        bridge = %config.bridge_url,
        "Starting matdev-linker {}",
        VERSION
    );

    let store = FileCredentialStore::new(&config.sessions_dir)
        .wrap_err("failed to prepare sessions directory")?;
    let manager = Arc::new(SessionManager::new(
        Arc::new(store),
        Arc::new(BridgeConnector::new(config.bridge_url.clone())),
        Arc::new(PngQrRenderer::new()),
        config.timings.clone(),
    ));
    manager.spawn_reaper();

    let (server, addr) =
        start_server(config.socket_addr(), manager.clone(), &config.allowed_origin).await?;
    info!("Serving on http://{}", addr);

    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for shutdown signal")?;

    info!("Shutting down");
    server.abort();
    manager.shutdown().await;

    Ok(())
}
