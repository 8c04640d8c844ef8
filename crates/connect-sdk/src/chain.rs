use async_trait::async_trait;

use crate::error::Result;
use crate::network::Network;
use crate::wallet::{AddressRecord, AssetInfo, Utxo};

/// Predicate over outpoint keys (`txid:vout`).
pub type SkipOutpoint<'a> = dyn Fn(&str) -> bool + Send + Sync + 'a;

/// Source of chain data for the wallet.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Unspent outputs of `addresses`, unblinded with each address's
    /// blinding key where possible.
    ///
    /// Outpoints for which `skip` returns `true` are neither fetched nor
    /// unblinded: they are returned as bare blinded entries (no asset, value
    /// or prevout) so the caller still learns they are unspent.
    async fn fetch_utxos(
        &self,
        network: Network,
        addresses: &[AddressRecord],
        skip: &SkipOutpoint<'_>,
    ) -> Result<Vec<Utxo>>;

    async fn fetch_asset_info(&self, network: Network, asset: &str) -> Result<AssetInfo>;
}
