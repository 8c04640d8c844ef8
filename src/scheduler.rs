use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use connect_sdk::{
    AppRepository, AssetRepository, ChainSource, KeyValueStore, WalletRepository,
    update_asset_infos, update_utxos,
};
use tokio::time::MissedTickBehavior;

/// Keeps the current network's UTXO set and asset cache in step with the
/// chain.
pub struct SyncScheduler {
    app: AppRepository,
    wallets: WalletRepository,
    assets: AssetRepository,
    chain: Arc<dyn ChainSource>,
}

impl SyncScheduler {
    pub fn new(store: Arc<dyn KeyValueStore>, chain: Arc<dyn ChainSource>) -> Self {
        Self {
            app: AppRepository::new(store.clone()),
            wallets: WalletRepository::new(store.clone()),
            assets: AssetRepository::new(store),
            chain,
        }
    }

    /// One reconcile + asset refresh of whichever network is current.
    pub async fn sync_once(&self) -> connect_sdk::Result<()> {
        let network = self.app.network()?;
        update_utxos(&self.wallets, self.chain.as_ref(), network).await?;
        update_asset_infos(&self.wallets, &self.assets, self.chain.as_ref(), network).await?;
        Ok(())
    }

    /// Sync every `interval` until `shutdown` resolves. A failed round is
    /// logged and retried on the next tick.
    pub async fn run(self, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once().await {
                        log::warn!("sync failed: {e}");
                    }
                }
            }
        }
        log::debug!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use connect_sdk::testing::{StaticChainSource, empty_wallet, explicit_utxo};
    use connect_sdk::{AssetInfo, MemoryStore, Network};

    use super::*;

    const NET: Network = Network::LiquidRegtest;

    #[tokio::test]
    async fn sync_fills_utxos_and_assets() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        AppRepository::new(store.clone()).set_network(NET).unwrap();
        WalletRepository::new(store.clone())
            .put(NET, empty_wallet())
            .unwrap();

        let utxo = explicit_utxo(NET, 1, 0, NET.policy_asset(), 5_000);
        let policy = NET.policy_asset().to_string();
        let chain = StaticChainSource::new(vec![utxo.clone()]).with_asset(
            &policy,
            AssetInfo {
                name: "Liquid Bitcoin".into(),
                ticker: "L-BTC".into(),
                precision: 8,
            },
        );

        let scheduler = SyncScheduler::new(store.clone(), Arc::new(chain));
        scheduler.sync_once().await.unwrap();

        let wallet = WalletRepository::new(store.clone()).get(NET).unwrap();
        assert!(wallet.utxo_map.contains_key(&utxo.outpoint()));
        let assets = AssetRepository::new(store).get(NET).unwrap();
        assert_eq!(assets[&policy].ticker, "L-BTC");
    }

    #[tokio::test]
    async fn missing_wallet_fails_the_round() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let scheduler = SyncScheduler::new(store, Arc::new(StaticChainSource::default()));
        assert!(matches!(
            scheduler.sync_once().await,
            Err(connect_sdk::Error::WalletNotFound)
        ));
    }
}
