//! Asset metadata refresh for the assets held by the wallet.

use std::collections::{BTreeMap, BTreeSet};

use crate::chain::ChainSource;
use crate::error::Result;
use crate::network::Network;
use crate::repos::{AssetRepository, WalletRepository};

/// Fetch metadata for every held asset not yet cached on `network` and merge
/// it in one update. Assets whose lookup fails are retried on the next run.
/// Returns the number of newly cached assets.
pub async fn update_asset_infos(
    wallets: &WalletRepository,
    assets: &AssetRepository,
    chain: &dyn ChainSource,
    network: Network,
) -> Result<usize> {
    let wallet = wallets.get(network)?;
    let cached = assets.get(network)?;
    let missing: BTreeSet<&str> = wallet
        .utxo_map
        .values()
        .filter_map(|utxo| utxo.asset.as_deref())
        .filter(|asset| !cached.contains_key(*asset))
        .collect();

    if missing.is_empty() {
        return Ok(0);
    }

    let mut fetched = BTreeMap::new();
    for asset in missing {
        match chain.fetch_asset_info(network, asset).await {
            Ok(info) => {
                fetched.insert(asset.to_string(), info);
            }
            Err(e) => log::warn!("asset info for {asset} unavailable: {e}"),
        }
    }

    let count = fetched.len();
    if count > 0 {
        assets.merge(network, fetched)?;
        log::info!("cached {count} new assets on {network}");
    }
    Ok(count)
}
