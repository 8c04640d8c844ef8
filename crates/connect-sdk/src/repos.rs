//! Typed repositories over the shared [`KeyValueStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::kv::{KeyValueStore, Repository};
use crate::network::Network;
use crate::wallet::{
    APP_KEY, ASSETS_KEY, AppData, AssetInfo, AssetsByNetwork, UtxoMap, WALLET_KEY, WalletData,
};

/// Wallet records, one per network.
#[derive(Clone)]
pub struct WalletRepository {
    repo: Repository<BTreeMap<Network, WalletData>>,
}

impl WalletRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            repo: Repository::new(store, WALLET_KEY),
        }
    }

    pub fn get(&self, network: Network) -> Result<WalletData> {
        self.repo
            .get()?
            .remove(&network)
            .ok_or(Error::WalletNotFound)
    }

    pub fn exists(&self, network: Network) -> Result<bool> {
        Ok(self.repo.get()?.contains_key(&network))
    }

    /// Store a wallet for `network`, replacing any previous one.
    pub fn put(&self, network: Network, wallet: WalletData) -> Result<()> {
        self.repo.update(|mut all| {
            all.insert(network, wallet);
            Ok(all)
        })?;
        Ok(())
    }

    /// Atomically modify the wallet of `network`. Fails with
    /// [`Error::WalletNotFound`] when there is none, writing nothing.
    pub fn update<F, R>(&self, network: Network, f: F) -> Result<R>
    where
        F: FnOnce(&mut WalletData) -> Result<R>,
    {
        let mut out = None;
        self.repo.update(|mut all| {
            let wallet = all.get_mut(&network).ok_or(Error::WalletNotFound)?;
            out = Some(f(wallet)?);
            Ok(all)
        })?;
        out.ok_or(Error::WalletNotFound)
    }

    /// Replace only the UTXO set of `network`.
    pub fn set_utxos(&self, network: Network, utxos: UtxoMap) -> Result<()> {
        self.update(network, |wallet| {
            wallet.utxo_map = utxos;
            Ok(())
        })
    }
}

/// Application record holding the selected network.
#[derive(Clone)]
pub struct AppRepository {
    repo: Repository<AppData>,
}

impl AppRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            repo: Repository::new(store, APP_KEY),
        }
    }

    pub fn network(&self) -> Result<Network> {
        Ok(self.repo.get()?.network)
    }

    pub fn set_network(&self, network: Network) -> Result<()> {
        self.repo.update(|mut app| {
            app.network = network;
            Ok(app)
        })?;
        log::info!("switched to {network}");
        Ok(())
    }
}

/// Append-only asset metadata cache.
#[derive(Clone)]
pub struct AssetRepository {
    repo: Repository<AssetsByNetwork>,
}

impl AssetRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            repo: Repository::new(store, ASSETS_KEY),
        }
    }

    pub fn get(&self, network: Network) -> Result<BTreeMap<String, AssetInfo>> {
        Ok(self.repo.get()?.remove(&network).unwrap_or_default())
    }

    /// Merge `infos` into the cache of `network`. Cached entries are kept.
    pub fn merge(&self, network: Network, infos: BTreeMap<String, AssetInfo>) -> Result<()> {
        self.repo.update(|mut all| {
            let cache = all.entry(network).or_default();
            for (asset, info) in infos {
                cache.entry(asset).or_insert(info);
            }
            Ok(all)
        })?;
        Ok(())
    }
}
