pub mod chain_adapter;
pub mod config;
pub mod launcher;
pub mod logging;
pub mod scheduler;
pub mod server;
pub mod setup;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use connect_sdk::{KeyValueStore, Router, WalletIdentityProvider};
use connect_store::SqliteStore;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;

use chain_adapter::{ChainAdapterError, ElectrumChainAdapter};
use config::{AppConfig, ConfigError};
use launcher::{CommandLauncher, generate_ui_token};
use scheduler::SyncScheduler;
use server::ServerError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] connect_store::StoreError),

    #[error(transparent)]
    Chain(#[from] ChainAdapterError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open the SQLite store of `data_dir`, creating the directory if needed.
pub fn open_store(data_dir: &Path) -> Result<Arc<dyn KeyValueStore>, AppError> {
    std::fs::create_dir_all(data_dir)?;
    let path = AppConfig::store_path(data_dir);
    let store = SqliteStore::open(&path.to_string_lossy())?;
    Ok(Arc::new(store))
}

/// Run the transport and the sync scheduler until `shutdown` resolves.
pub async fn run(
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), AppError> {
    let chain = Arc::new(ElectrumChainAdapter::new(&config)?);
    let ui_token: Arc<str> = generate_ui_token().into();
    let launcher = Arc::new(CommandLauncher::new(
        config.approval_ui_url.clone(),
        config.approval_opener.clone(),
        ui_token.to_string(),
    ));
    let router = Arc::new(Router::new(
        store.clone(),
        launcher,
        Arc::new(WalletIdentityProvider),
        config.router_options(),
    ));

    let listener = TcpListener::bind(&config.listen).await?;

    let (stop, stopped) = watch::channel(false);
    let scheduler = SyncScheduler::new(store, chain);
    let sync = tokio::spawn(scheduler.run(config.sync_interval(), wait_for_stop(stopped)));
    let served = server::serve(listener, router, ui_token, async move {
        shutdown.await;
        let _ = stop.send(true);
    })
    .await;

    // The transport may have failed without a shutdown signal.
    sync.abort();
    served?;
    Ok(())
}

async fn wait_for_stop(mut stopped: watch::Receiver<bool>) {
    while !*stopped.borrow_and_update() {
        if stopped.changed().await.is_err() {
            return;
        }
    }
}
